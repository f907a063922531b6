//! One push connection per game instance, shared by every holder.
//!
//! [`ConnectionRegistry::acquire`] hands out [`GameConnection`] handles. All
//! handles for an instance share a single [`TransportClient`]; the registry
//! only keeps weak references, so the client lives exactly as long as its
//! holders. Releasing the last handle disconnects it.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::{ConnectionState, SyncConfig, TransportClient};
use crate::error::{Result, ScoreboardError};
use crate::transport::Connector;

/// Registry of live clients keyed by game instance id.
pub struct ConnectionRegistry {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    clients: Mutex<HashMap<String, Weak<TransportClient>>>,
}

impl ConnectionRegistry {
    /// Create a registry whose clients dial through `connector`.
    pub fn new(config: SyncConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry whose clients dial over WebSocket.
    #[cfg(feature = "transport-websocket")]
    pub fn websocket(config: SyncConfig) -> Self {
        let connector = crate::transports::WebSocketConnector::new(config.connect_timeout);
        Self::new(config, Arc::new(connector))
    }

    /// Get a handle to the instance's client, creating and connecting it if
    /// needed.
    ///
    /// A client that is idle or failed is connected again; one that is open
    /// or reconnecting is shared as is. Concurrent acquirers of an instance
    /// that is still on its first dial wait for that dial. The registry lock
    /// is not held while dialing, so other instances are never held up.
    ///
    /// # Errors
    ///
    /// Propagates the error of the initial [`TransportClient::connect`];
    /// a waiter whose shared dial failed gets [`ScoreboardError::NotConnected`].
    pub async fn acquire(&self, instance_id: &str) -> Result<GameConnection> {
        let client = self.client_for(instance_id).await;

        let needs_dial = client.is_dialing()
            || matches!(
                client.state(),
                ConnectionState::Idle | ConnectionState::Failed
            );
        if needs_dial {
            match client.connect().await {
                Ok(()) => {}
                Err(ScoreboardError::AlreadyConnecting) => dial_settled(&client).await?,
                Err(e) => return Err(e),
            }
        }
        Ok(GameConnection { client })
    }

    async fn client_for(&self, instance_id: &str) -> Arc<TransportClient> {
        let mut clients = self.clients.lock().await;
        clients.retain(|_, weak| weak.strong_count() > 0);

        if let Some(client) = clients.get(instance_id).and_then(Weak::upgrade) {
            debug!(instance_id, holders = Arc::strong_count(&client), "sharing client");
            return client;
        }
        info!(instance_id, "creating client");
        let client = Arc::new(TransportClient::new(
            instance_id,
            self.config.clone(),
            Arc::clone(&self.connector),
        ));
        clients.insert(instance_id.to_string(), Arc::downgrade(&client));
        client
    }

    /// Number of live handles for an instance.
    pub async fn holders(&self, instance_id: &str) -> usize {
        self.clients
            .lock()
            .await
            .get(instance_id)
            .map_or(0, Weak::strong_count)
    }

    /// Instance ids with at least one live handle.
    pub async fn instances(&self) -> Vec<String> {
        let clients = self.clients.lock().await;
        clients
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Wait out a dial started by another acquirer.
async fn dial_settled(client: &TransportClient) -> Result<()> {
    let mut states = client.state_changes();
    let settled = states
        .wait_for(|state| *state != ConnectionState::Connecting)
        .await
        .map(|state| *state);
    match settled {
        Ok(ConnectionState::Open) => Ok(()),
        _ => Err(ScoreboardError::NotConnected),
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A holder's share of an instance's client.
///
/// Dereferences to [`TransportClient`]. Prefer [`release`](Self::release) to
/// dropping: the last release disconnects gracefully, while dropping the
/// last handle only aborts the connection task.
#[derive(Debug)]
pub struct GameConnection {
    client: Arc<TransportClient>,
}

impl GameConnection {
    /// Give up this handle; the last one disconnects the client.
    pub async fn release(self) {
        if let Some(client) = Arc::into_inner(self.client) {
            debug!(instance_id = client.instance_id(), "last holder released");
            client.disconnect().await;
        }
    }
}

impl Clone for GameConnection {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl Deref for GameConnection {
    type Target = TransportClient;

    fn deref(&self) -> &TransportClient {
        &self.client
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Transport that never receives anything until closed.
    struct Silent;

    #[async_trait]
    impl Transport for Silent {
        async fn send(&mut self, _message: String) -> std::result::Result<(), ScoreboardError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, ScoreboardError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), ScoreboardError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        dials: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> std::result::Result<Box<dyn Transport>, ScoreboardError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Silent))
        }
    }

    #[tokio::test]
    async fn holders_share_one_client() {
        let connector = Arc::new(CountingConnector::default());
        let registry = ConnectionRegistry::new(SyncConfig::default(), connector.clone());

        let a = registry.acquire("g1").await.unwrap();
        let b = registry.acquire("g1").await.unwrap();
        let other = registry.acquire("g2").await.unwrap();

        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
        assert_eq!(registry.holders("g1").await, 2);
        assert!(a.is_connected() && b.is_connected() && other.is_connected());

        let mut instances = registry.instances().await;
        instances.sort();
        assert_eq!(instances, vec!["g1".to_string(), "g2".to_string()]);
    }

    #[tokio::test]
    async fn last_release_disconnects() {
        let connector = Arc::new(CountingConnector::default());
        let registry = ConnectionRegistry::new(SyncConfig::default(), connector.clone());

        let a = registry.acquire("g1").await.unwrap();
        let b = a.clone();
        let mut state = b.state_changes();

        a.release().await;
        assert_eq!(b.state(), ConnectionState::Open);

        b.release().await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Idle);
        assert_eq!(registry.holders("g1").await, 0);

        let _c = registry.acquire("g1").await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn initial_failure_leaves_nothing_registered() {
        struct Refusing;

        #[async_trait]
        impl Connector for Refusing {
            async fn connect(
                &self,
                _url: &str,
            ) -> std::result::Result<Box<dyn Transport>, ScoreboardError> {
                Err(ScoreboardError::Timeout)
            }
        }

        let registry = ConnectionRegistry::new(SyncConfig::default(), Arc::new(Refusing));
        assert!(matches!(
            registry.acquire("g1").await,
            Err(ScoreboardError::Timeout)
        ));
        assert_eq!(registry.holders("g1").await, 0);
    }

    /// Dials instantly, except `slow` instances which take ten seconds.
    #[derive(Default)]
    struct SlowForSome {
        dials: AtomicUsize,
    }

    #[async_trait]
    impl Connector for SlowForSome {
        async fn connect(
            &self,
            url: &str,
        ) -> std::result::Result<Box<dyn Transport>, ScoreboardError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("/slow") {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(Box::new(Silent))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dial_does_not_hold_up_other_instances() {
        let registry = Arc::new(ConnectionRegistry::new(
            SyncConfig::default(),
            Arc::new(SlowForSome::default()),
        ));
        let slow = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.acquire("slow").await })
        };
        while registry.instances().await.is_empty() {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        let fast = registry.acquire("fast").await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(fast.is_connected());

        let slow = slow.await.unwrap().unwrap();
        assert!(slow.is_connected());
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_share_the_first_dial() {
        let connector = Arc::new(SlowForSome::default());
        let registry = Arc::new(ConnectionRegistry::new(
            SyncConfig::default(),
            connector.clone(),
        ));

        let first = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.acquire("slow").await })
        };
        while connector.dials.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = registry.acquire("slow").await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.is_connected() && second.is_connected());
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(registry.holders("slow").await, 2);
    }
}
