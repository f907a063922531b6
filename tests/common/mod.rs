#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for scoreboard-sync integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that hands out
//! transports (or failures) in order, a canned [`MockApi`], and helpers for
//! building push frames.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use scoreboard_sync::status::{GameStatus, TeamInfo, WireFlag, WireNumber};
use scoreboard_sync::{encode_game_status, ApiResponse, Connector, Endpoint, ObserverApi};
use scoreboard_sync::{ScoreboardError, Transport};
use serde_json::Value;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport.
///
/// Scripted server frames are consumed in order by `recv()`; a `None` entry
/// closes the connection. Once the script runs out `recv()` hangs so the
/// connection stays open until shutdown. All sent frames are recorded.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, ScoreboardError>>>,
    /// Recorded outgoing frames.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a transport with the given scripted incoming frames.
    pub fn new(
        incoming: Vec<Option<Result<String, ScoreboardError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ScoreboardError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ScoreboardError>> {
        match self.incoming.pop_front() {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ScoreboardError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out scripted dial results in order; refuses once the script is empty.
#[derive(Default)]
pub struct MockConnector {
    script: StdMutex<VecDeque<Result<MockTransport, ScoreboardError>>>,
    /// Number of dials so far.
    pub dials: AtomicUsize,
}

impl MockConnector {
    /// Create a connector with the given scripted dial results.
    pub fn new(script: Vec<Result<MockTransport, ScoreboardError>>) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(VecDeque::from(script)),
            dials: AtomicUsize::new(0),
        })
    }

    /// Dials attempted so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, ScoreboardError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(refused()),
        }
    }
}

/// The error a refusing connector returns.
pub fn refused() -> ScoreboardError {
    ScoreboardError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

// ── MockApi ─────────────────────────────────────────────────────────

/// Serves canned JSON bodies by request path; unknown paths answer 404.
#[derive(Default)]
pub struct MockApi {
    bodies: StdMutex<HashMap<String, (u16, Value)>>,
    /// Every requested path, in order.
    pub requests: StdMutex<Vec<String>>,
}

impl MockApi {
    /// Answer `path` with `status` and `body`.
    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.bodies
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body));
    }

    /// Builder form of [`respond`](Self::respond) for a 200 answer.
    pub fn with_ok(self, path: &str, body: Value) -> Self {
        self.respond(path, 200, body);
        self
    }
}

#[async_trait]
impl ObserverApi for MockApi {
    async fn fetch(&self, endpoint: Endpoint<'_>) -> ApiResponse {
        let path = endpoint.path();
        self.requests.lock().unwrap().push(path.clone());
        match self.bodies.lock().unwrap().get(&path) {
            Some((status, body)) => ApiResponse::from_body(*status, &body.to_string()),
            None => ApiResponse::from_body(404, r#"{"error":"not found"}"#),
        }
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

/// A pushed team with a string score and a `"True"`/`"False"` finish flag.
pub fn team(id: i64, name: &str, score: &str, finished: bool) -> TeamInfo {
    let mut team = TeamInfo::new(id, name);
    team.score = Some(WireNumber::from(score));
    team.has_finished = Some(WireFlag::Text(
        if finished { "True" } else { "False" }.to_string(),
    ));
    team
}

/// JSON text of a `game_status_update` frame carrying `status`.
pub fn status_frame(status: &GameStatus) -> String {
    let plist = encode_game_status(status).expect("encode snapshot");
    serde_json::json!({"event": "game_status_update", "data": plist}).to_string()
}

/// JSON text of a server heartbeat frame.
pub fn heartbeat_frame(timestamp: i64) -> String {
    serde_json::json!({"type": "heartbeat", "timestamp": timestamp}).to_string()
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
