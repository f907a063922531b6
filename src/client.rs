//! Push-channel client for one game instance.
//!
//! [`TransportClient`] owns the socket for a single game instance. A
//! successful [`connect`](TransportClient::connect) spawns a background
//! connection loop that multiplexes inbound frames, outbound sends and the
//! heartbeat timer via `tokio::select!`, and that redials on unexpected close
//! according to a [`ReconnectPolicy`].
//!
//! # Example
//!
//! ```rust,ignore
//! let client = TransportClient::websocket("48213", SyncConfig::default());
//! let _sub = client.subscribe(|status| println!("{} teams", status.teams.len()));
//! client.connect().await?;
//! // ...
//! client.disconnect().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{Result, ScoreboardError};
use crate::heartbeat::{Heartbeat, DEFAULT_HEARTBEAT_INTERVAL};
use crate::publisher::{StatusPublisher, Subscription};
use crate::reconnect::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};
use crate::status::GameStatus;
use crate::transport::{Connector, Transport};

/// Default base URL of the push channel.
pub const DEFAULT_WS_BASE_URL: &str = "wss://cms.locatify.com";

/// Default timeout for a single dial.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown of the connection loop.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity for channel subscriptions.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for the push channel.
///
/// # Example
///
/// ```
/// use scoreboard_sync::client::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::default()
///     .with_heartbeat_interval(Duration::from_secs(15))
///     .with_max_reconnect_attempts(3);
/// assert_eq!(config.game_url("42"), "wss://cms.locatify.com/ws/game/42");
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Scheme and host of the push channel; the game path is appended.
    pub ws_base_url: String,
    /// Period of outbound heartbeats while open. Defaults to **30 seconds**.
    pub heartbeat_interval: Duration,
    /// Fixed delay before each reconnection attempt. Defaults to **5 seconds**.
    pub reconnect_delay: Duration,
    /// Reconnection attempts after an unexpected close before giving up.
    /// Defaults to **10**.
    pub max_reconnect_attempts: u32,
    /// Timeout for a single dial. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Time the connection loop gets to close the socket on disconnect before
    /// it is aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Capacity of channels created by [`TransportClient::subscribe_channel`].
    /// Defaults to **256**; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Set the push channel base URL, e.g. `ws://localhost:8000`.
    #[must_use]
    pub fn with_ws_base_url(mut self, url: impl Into<String>) -> Self {
        self.ws_base_url = url.into();
        self
    }

    /// Set the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the delay before each reconnection attempt.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the reconnection attempt cap.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the channel subscription capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Push channel URL for a game instance.
    pub fn game_url(&self, instance_id: &str) -> String {
        format!(
            "{}/ws/game/{}",
            self.ws_base_url.trim_end_matches('/'),
            instance_id
        )
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Idle,
    /// Dialing, either the initial connect or a reconnection attempt.
    Connecting,
    /// Open; heartbeats are running.
    Open,
    /// Lost unexpectedly; a reconnection attempt is pending.
    Closed,
    /// Initial connect failed or reconnection attempts are exhausted.
    Failed,
}

struct LoopHandle {
    task: tokio::task::JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
    cmd_tx: mpsc::UnboundedSender<String>,
}

/// Resets the in-flight flag on every exit path of `connect`.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Owner of the push-channel socket for one game instance.
pub struct TransportClient {
    instance_id: String,
    url: String,
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    publisher: StatusPublisher,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    connecting: AtomicBool,
    /// Bumped by `disconnect` so a dial that finishes afterwards is discarded.
    generation: AtomicU64,
    handle: Mutex<Option<LoopHandle>>,
}

impl TransportClient {
    /// Create an idle client that dials through `connector`.
    pub fn new(
        instance_id: impl Into<String>,
        config: SyncConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let instance_id = instance_id.into();
        let url = config.game_url(&instance_id);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            instance_id,
            url,
            config,
            connector,
            publisher: StatusPublisher::new(),
            state_tx: Arc::new(state_tx),
            connecting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            handle: Mutex::new(None),
        }
    }

    /// Create an idle client that dials over WebSocket.
    #[cfg(feature = "transport-websocket")]
    pub fn websocket(instance_id: impl Into<String>, config: SyncConfig) -> Self {
        let connector = crate::transports::WebSocketConnector::new(config.connect_timeout);
        Self::new(instance_id, config, Arc::new(connector))
    }

    /// Open the push channel.
    ///
    /// Resolves once the socket is open. Calling it while already open is a
    /// no-op; calling it while a reconnection is pending replaces that
    /// pending attempt with this one.
    ///
    /// # Errors
    ///
    /// - [`ScoreboardError::AlreadyConnecting`] if another `connect` is in flight.
    /// - [`ScoreboardError::NotConnected`] if [`disconnect`](Self::disconnect)
    ///   was called while dialing.
    /// - Any error from the connector; the state is then `Failed` and no
    ///   reconnection is scheduled.
    pub async fn connect(&self) -> Result<()> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ScoreboardError::AlreadyConnecting);
        }
        let _guard = ConnectingGuard(&self.connecting);

        if self.state() == ConnectionState::Open {
            return Ok(());
        }

        self.stop_loop().await;
        let generation = self.generation.load(Ordering::Acquire);
        set_state(&self.state_tx, ConnectionState::Connecting);

        let transport = match self.connector.connect(&self.url).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(instance_id = %self.instance_id, error = %e, "initial connect failed");
                set_state(&self.state_tx, ConnectionState::Failed);
                return Err(e);
            }
        };

        // Checked under the slot lock: a `disconnect` either bumped the
        // generation already or will find the handle stored here.
        let stale = {
            let mut slot = self.handle_slot();
            if self.generation.load(Ordering::Acquire) == generation {
                *slot = Some(self.spawn_loop(transport));
                None
            } else {
                Some(transport)
            }
        };

        if let Some(mut transport) = stale {
            debug!(instance_id = %self.instance_id, "disconnected while dialing, dropping socket");
            let _ = transport.close().await;
            return Err(ScoreboardError::NotConnected);
        }
        Ok(())
    }

    fn spawn_loop(&self, transport: Box<dyn Transport>) -> LoopHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        set_state(&self.state_tx, ConnectionState::Open);
        info!(instance_id = %self.instance_id, url = %self.url, "push channel open");

        let ctx = LoopContext {
            instance_id: self.instance_id.clone(),
            url: self.url.clone(),
            connector: Arc::clone(&self.connector),
            publisher: self.publisher.clone(),
            state_tx: Arc::clone(&self.state_tx),
            heartbeat_interval: self.config.heartbeat_interval,
            policy: ReconnectPolicy::new(
                self.config.reconnect_delay,
                self.config.max_reconnect_attempts,
            ),
        };
        LoopHandle {
            task: tokio::spawn(connection_loop(ctx, transport, cmd_rx, shutdown_rx)),
            shutdown_tx,
            cmd_tx,
        }
    }

    /// Close the push channel and cancel every pending timer.
    ///
    /// Idempotent. Always ends in [`ConnectionState::Idle`] and never
    /// triggers reconnection. Subscriptions are left in place.
    pub async fn disconnect(&self) {
        debug!(instance_id = %self.instance_id, "disconnect requested");
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.stop_loop().await;
        set_state(&self.state_tx, ConnectionState::Idle);
    }

    /// Queue a raw text frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ScoreboardError::NotConnected`] unless the channel is open.
    /// This is non-fatal: nothing is torn down and the frame is dropped.
    pub fn send(&self, message: impl Into<String>) -> Result<()> {
        if self.state() != ConnectionState::Open {
            warn!(instance_id = %self.instance_id, "send while not open, dropping frame");
            return Err(ScoreboardError::NotConnected);
        }
        let slot = self.handle_slot();
        let Some(handle) = slot.as_ref() else {
            return Err(ScoreboardError::NotConnected);
        };
        handle
            .cmd_tx
            .send(message.into())
            .map_err(|_| ScoreboardError::NotConnected)
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Register a callback for decoded snapshots. See [`StatusPublisher::subscribe`].
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<GameStatus>) + Send + Sync + 'static,
    {
        self.publisher.subscribe(callback)
    }

    /// Receive decoded snapshots over a channel sized by
    /// [`SyncConfig::event_channel_capacity`].
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::Receiver<Arc<GameStatus>>) {
        self.publisher
            .subscribe_channel(self.config.event_channel_capacity)
    }

    /// The publisher fed by this connection.
    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// `true` while the channel is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Game instance this client is bound to.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// `true` while a [`connect`](Self::connect) call is dialing.
    pub(crate) fn is_dialing(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn handle_slot(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal the connection loop to stop and wait for it, aborting it if it
    /// does not exit within the shutdown timeout.
    async fn stop_loop(&self) {
        let Some(handle) = self.handle_slot().take() else {
            return;
        };
        let _ = handle.shutdown_tx.send(());

        let mut task = handle.task;
        match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!("connection loop terminated with join error: {join_err}");
            }
            Err(_) => {
                warn!("connection loop did not exit within timeout; aborting task");
                task.abort();
                if let Err(join_err) = task.await {
                    debug!("connection loop aborted: {join_err}");
                }
            }
        }
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .field("subscribers", &self.publisher.subscriber_count())
            .finish()
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        // No executor context for a graceful close; aborting drops the loop
        // future together with its timers and socket.
        if let Some(handle) = self.handle_slot().take() {
            handle.task.abort();
        }
    }
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state_tx.send_replace(next);
    if previous != next {
        debug!(from = ?previous, to = ?next, "connection state changed");
    }
}

// ── Connection loop ─────────────────────────────────────────────────

struct LoopContext {
    instance_id: String,
    url: String,
    connector: Arc<dyn Connector>,
    publisher: StatusPublisher,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    heartbeat_interval: Duration,
    policy: ReconnectPolicy,
}

enum SessionEnd {
    /// Operator-initiated: disconnect or client dropped.
    Shutdown,
    /// The socket closed or errored on its own.
    Lost(String),
}

enum Redial {
    Opened(Box<dyn Transport>),
    Shutdown,
    Exhausted,
}

/// Background loop owning the socket.
///
/// Exits on operator shutdown (state `Idle`) or when reconnection attempts
/// are exhausted (state `Failed`).
async fn connection_loop(
    mut ctx: LoopContext,
    mut transport: Box<dyn Transport>,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(instance_id = %ctx.instance_id, "connection loop started");

    loop {
        ctx.policy.on_open();
        set_state(&ctx.state_tx, ConnectionState::Open);

        let end = run_open(&ctx, &mut transport, &mut cmd_rx, &mut shutdown_rx).await;
        let _ = transport.close().await;

        match end {
            SessionEnd::Shutdown => {
                set_state(&ctx.state_tx, ConnectionState::Idle);
                break;
            }
            SessionEnd::Lost(reason) => {
                info!(instance_id = %ctx.instance_id, %reason, "push channel lost");
                // Frames queued for the dead socket are not replayed.
                while cmd_rx.try_recv().is_ok() {}

                match redial(&mut ctx, &mut shutdown_rx).await {
                    Redial::Opened(next) => {
                        info!(instance_id = %ctx.instance_id, "push channel reopened");
                        transport = next;
                    }
                    Redial::Shutdown => {
                        set_state(&ctx.state_tx, ConnectionState::Idle);
                        break;
                    }
                    Redial::Exhausted => {
                        warn!(
                            instance_id = %ctx.instance_id,
                            attempts = ctx.policy.attempts(),
                            "reconnection attempts exhausted"
                        );
                        set_state(&ctx.state_tx, ConnectionState::Failed);
                        break;
                    }
                }
            }
        }
    }

    debug!(instance_id = %ctx.instance_id, "connection loop exited");
}

/// Serve one open socket. The heartbeat timer lives exactly as long as this call.
async fn run_open(
    ctx: &LoopContext,
    transport: &mut Box<dyn Transport>,
    cmd_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let mut heartbeat = Heartbeat::start(ctx.heartbeat_interval);

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return SessionEnd::Shutdown;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            warn!(error = %e, "failed to send frame");
                        }
                    }
                    None => return SessionEnd::Shutdown,
                }
            }

            frame = heartbeat.tick() => {
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        debug!("sending heartbeat");
                        if let Err(e) = transport.send(json).await {
                            warn!(error = %e, "failed to send heartbeat");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize heartbeat"),
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        ctx.publisher.publish(&text);
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("closed by server".to_string()),
                }
            }
        }
    }
}

/// Redial after an unexpected close. Each failed dial counts as another close.
async fn redial(ctx: &mut LoopContext, shutdown_rx: &mut oneshot::Receiver<()>) -> Redial {
    loop {
        set_state(&ctx.state_tx, ConnectionState::Closed);
        let Some(delay) = ctx.policy.on_unexpected_close() else {
            return Redial::Exhausted;
        };
        info!(
            instance_id = %ctx.instance_id,
            attempt = ctx.policy.attempts(),
            max_attempts = ctx.policy.max_attempts(),
            ?delay,
            "scheduling reconnect"
        );

        tokio::select! {
            _ = &mut *shutdown_rx => return Redial::Shutdown,
            () = tokio::time::sleep(delay) => {}
        }

        set_state(&ctx.state_tx, ConnectionState::Connecting);
        tokio::select! {
            _ = &mut *shutdown_rx => return Redial::Shutdown,
            result = ctx.connector.connect(&ctx.url) => match result {
                Ok(transport) => return Redial::Opened(transport),
                Err(e) => {
                    warn!(
                        instance_id = %ctx.instance_id,
                        attempt = ctx.policy.attempts(),
                        error = %e,
                        "reconnect failed"
                    );
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Transport fed from a channel so tests decide when frames and closes arrive.
    struct ChannelTransport {
        incoming: mpsc::UnboundedReceiver<Option<String>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), ScoreboardError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, ScoreboardError>> {
            match self.incoming.recv().await {
                Some(Some(text)) => Some(Ok(text)),
                // `Some(None)` or a dropped sender closes the socket.
                _ => None,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), ScoreboardError> {
            Ok(())
        }
    }

    /// Connector handing out pre-built transports; fails once they run out.
    struct ScriptedConnector {
        transports: StdMutex<VecDeque<ChannelTransport>>,
        dials: AtomicUsize,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> std::result::Result<Box<dyn Transport>, ScoreboardError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            match self.transports.lock().unwrap().pop_front() {
                Some(t) => Ok(Box::new(t)),
                None => Err(ScoreboardError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                ))),
            }
        }
    }

    type Feed = mpsc::UnboundedSender<Option<String>>;

    fn scripted(n: usize) -> (Arc<ScriptedConnector>, Vec<Feed>, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let mut feeds = Vec::new();
        let mut transports = VecDeque::new();
        for _ in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            feeds.push(tx);
            transports.push_back(ChannelTransport {
                incoming: rx,
                sent: Arc::clone(&sent),
            });
        }
        let connector = Arc::new(ScriptedConnector {
            transports: StdMutex::new(transports),
            dials: AtomicUsize::new(0),
        });
        (connector, feeds, sent)
    }

    async fn wait_for(client: &TransportClient, wanted: ConnectionState) {
        let mut rx = client.state_changes();
        rx.wait_for(|s| *s == wanted).await.unwrap();
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.ws_base_url, "wss://cms.locatify.com");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(
            SyncConfig::default().with_event_channel_capacity(0).event_channel_capacity,
            1
        );
    }

    #[test]
    fn game_url_trims_trailing_slash() {
        let config = SyncConfig::default().with_ws_base_url("ws://localhost:9000/");
        assert_eq!(config.game_url("abc"), "ws://localhost:9000/ws/game/abc");
    }

    #[tokio::test]
    async fn connect_opens_and_disconnect_returns_to_idle() {
        let (connector, _feeds, _sent) = scripted(1);
        let client = TransportClient::new("1", SyncConfig::default(), connector);
        assert_eq!(client.state(), ConnectionState::Idle);

        client.connect().await.unwrap();
        assert!(client.is_connected());

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Idle);
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn initial_failure_rejects_without_reconnecting() {
        let (connector, _feeds, _sent) = scripted(0);
        let client = TransportClient::new("1", SyncConfig::default(), connector.clone());

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ScoreboardError::Io(_)));
        assert_eq!(client.state(), ConnectionState::Failed);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_requires_open_connection() {
        let (connector, _feeds, sent) = scripted(1);
        let client = TransportClient::new("1", SyncConfig::default(), connector);

        assert!(matches!(
            client.send("early"),
            Err(ScoreboardError::NotConnected)
        ));

        client.connect().await.unwrap();
        client.send("hello").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*sent.lock().unwrap(), vec!["hello".to_string()]);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn frames_reach_subscribers() {
        let (connector, feeds, _sent) = scripted(1);
        let client = TransportClient::new("1", SyncConfig::default(), connector);
        let (_sub, mut rx) = client.subscribe_channel();
        client.connect().await.unwrap();

        let plist = r#"<plist version="1.0"><dict><key>status_code</key><string>ONGOING</string></dict></plist>"#;
        feeds[0]
            .send(Some(
                serde_json::json!({"event": "game_status_update", "data": plist}).to_string(),
            ))
            .unwrap();

        let status = rx.recv().await.unwrap();
        assert_eq!(status.status_code, "ONGOING");
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_only_while_open() {
        let (connector, feeds, sent) = scripted(1);
        let config = SyncConfig::default()
            .with_heartbeat_interval(Duration::from_secs(30))
            .with_max_reconnect_attempts(0);
        let client = TransportClient::new("1", config, connector);
        client.connect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(sent.lock().unwrap().len(), 3);

        // Server closes; with no attempts left the client fails and stays quiet.
        feeds[0].send(None).unwrap();
        wait_for(&client, ConnectionState::Failed).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_unexpected_close() {
        let (connector, feeds, _sent) = scripted(2);
        let config = SyncConfig::default().with_reconnect_delay(Duration::from_secs(5));
        let client = TransportClient::new("1", config, connector.clone());
        client.connect().await.unwrap();

        let start = tokio::time::Instant::now();
        feeds[0].send(None).unwrap();
        wait_for(&client, ConnectionState::Closed).await;
        wait_for(&client, ConnectionState::Open).await;

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (connector, feeds, _sent) = scripted(2);
        let client = TransportClient::new("1", SyncConfig::default(), connector.clone());
        client.connect().await.unwrap();

        feeds[0].send(None).unwrap();
        wait_for(&client, ConnectionState::Closed).await;
        client.disconnect().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn concurrent_connect_fails_fast() {
        struct SlowConnector;

        #[async_trait]
        impl Connector for SlowConnector {
            async fn connect(
                &self,
                _url: &str,
            ) -> std::result::Result<Box<dyn Transport>, ScoreboardError> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Err(ScoreboardError::Timeout)
            }
        }

        let client = Arc::new(TransportClient::new(
            "1",
            SyncConfig::default(),
            Arc::new(SlowConnector),
        ));
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = client.connect().await;
        assert!(matches!(second, Err(ScoreboardError::AlreadyConnecting)));
        assert!(matches!(
            first.await.unwrap(),
            Err(ScoreboardError::Timeout)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_during_dial_discards_the_socket() {
        struct GatedConnector {
            gate: Arc<tokio::sync::Notify>,
            closed: Arc<AtomicBool>,
        }

        struct Tracked(Arc<AtomicBool>);

        #[async_trait]
        impl Transport for Tracked {
            async fn send(&mut self, _message: String) -> std::result::Result<(), ScoreboardError> {
                Ok(())
            }

            async fn recv(&mut self) -> Option<std::result::Result<String, ScoreboardError>> {
                std::future::pending().await
            }

            async fn close(&mut self) -> std::result::Result<(), ScoreboardError> {
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        #[async_trait]
        impl Connector for GatedConnector {
            async fn connect(
                &self,
                _url: &str,
            ) -> std::result::Result<Box<dyn Transport>, ScoreboardError> {
                self.gate.notified().await;
                Ok(Box::new(Tracked(Arc::clone(&self.closed))))
            }
        }

        let gate = Arc::new(tokio::sync::Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let client = Arc::new(TransportClient::new(
            "1",
            SyncConfig::default(),
            Arc::new(GatedConnector {
                gate: Arc::clone(&gate),
                closed: Arc::clone(&closed),
            }),
        ));

        let dial = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.connect().await })
        };
        wait_for(&client, ConnectionState::Connecting).await;

        client.disconnect().await;
        gate.notify_one();

        assert!(matches!(
            dial.await.unwrap(),
            Err(ScoreboardError::NotConnected)
        ));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(client.handle_slot().is_none());
    }

    #[tokio::test]
    async fn disconnect_keeps_subscriptions() {
        let (connector, _feeds, _sent) = scripted(1);
        let client = TransportClient::new("1", SyncConfig::default(), connector);
        let _sub = client.subscribe(|_| {});
        client.connect().await.unwrap();
        client.disconnect().await;
        assert_eq!(client.publisher().subscriber_count(), 1);
    }
}
