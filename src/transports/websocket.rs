//! Game-status socket over `tokio-tungstenite`.
//!
//! The backend speaks text frames only. `wss://` is the production scheme;
//! plain `ws://` is accepted for local servers.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::ScoreboardError;
use crate::transport::{Connector, Transport};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] over one game-status WebSocket.
///
/// `recv` may be raced in `select!`: a dropped future never loses a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Open the game-status socket at `url`.
    ///
    /// # Errors
    ///
    /// [`ScoreboardError::Io`] for a bad URL, a refused connection or a failed
    /// handshake.
    pub async fn connect(url: &str) -> Result<Self, ScoreboardError> {
        tracing::debug!(url = %url, "dialing game status socket");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(dial_error)?;
        tracing::info!(url = %url, "game status socket open");
        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// [`connect`](Self::connect) bounded by `limit`.
    ///
    /// # Errors
    ///
    /// [`ScoreboardError::Timeout`] once `limit` elapses, otherwise as
    /// [`connect`](Self::connect).
    pub async fn connect_with_timeout(url: &str, limit: Duration) -> Result<Self, ScoreboardError> {
        match tokio::time::timeout(limit, Self::connect(url)).await {
            Ok(result) => result,
            Err(_) => Err(ScoreboardError::Timeout),
        }
    }
}

/// Keep the io kind of a socket-level failure so callers can tell a refusal apart.
fn dial_error(error: tokio_tungstenite::tungstenite::Error) -> ScoreboardError {
    let kind = match &error {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    ScoreboardError::Io(std::io::Error::new(kind, error))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ScoreboardError> {
        if self.closed {
            return Err(ScoreboardError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ScoreboardError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ScoreboardError>> {
        while let Some(next) = self.stream.next().await {
            match next {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(reason)) => {
                    tracing::debug!(?reason, "server closed game status socket");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    tracing::warn!(len = bytes.len(), "ignoring binary frame on game status socket");
                }
                // Pongs are queued by tungstenite.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ScoreboardError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), ScoreboardError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.stream
            .close(None)
            .await
            .map_err(|e| ScoreboardError::TransportSend(e.to_string()))
    }
}

/// [`Connector`] that dials WebSocket URLs with a connect timeout.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector that gives up on a dial after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ScoreboardError> {
        let transport = WebSocketTransport::connect_with_timeout(url, self.timeout).await?;
        Ok(Box::new(transport))
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

    use std::sync::{Arc, Mutex};

    use tokio::net::TcpListener;

    const HEARTBEAT: &str = r#"{"type":"heartbeat","timestamp":1700000000000}"#;
    const STATUS: &str = r#"{"event":"game_status_update","data":"<plist/>"}"#;

    /// A one-connection game server on a random local port.
    ///
    /// Sends `script` once the handshake completes (a `None` entry sends a
    /// binary frame instead of text), records every text frame the client
    /// sends, and closes when the client does or `close_after` is set.
    async fn game_server(
        script: Vec<Option<&'static str>>,
        close_after: bool,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/game/48213", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            for frame in script {
                let message = match frame {
                    Some(text) => Message::Text(text.into()),
                    None => Message::Binary(vec![0x62, 0x70].into()),
                };
                socket.send(message).await.unwrap();
            }
            if close_after {
                let _ = socket.close(None).await;
                return;
            }
            while let Some(Ok(message)) = socket.next().await {
                if let Message::Text(text) = message {
                    sink.lock().unwrap().push(text.as_str().to_owned());
                }
            }
        });

        (url, received)
    }

    #[tokio::test]
    async fn malformed_url_is_an_io_error() {
        let result = WebSocketTransport::connect("cms.locatify.com/ws/game/1").await;
        assert!(matches!(result, Err(ScoreboardError::Io(_))));
    }

    #[tokio::test]
    async fn refused_dial_keeps_the_io_kind() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match WebSocketTransport::connect(&format!("ws://{addr}/ws/game/1")).await {
            Err(ScoreboardError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected refused dial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_arrive_in_order_then_close() {
        let (url, _) = game_server(vec![Some(HEARTBEAT), Some(STATUS)], true).await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(socket.recv().await.unwrap().unwrap(), HEARTBEAT);
        assert_eq!(socket.recv().await.unwrap().unwrap(), STATUS);
        assert!(socket.recv().await.is_none());
    }

    #[tokio::test]
    async fn binary_frames_are_skipped() {
        let (url, _) = game_server(vec![None, Some(STATUS)], true).await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(socket.recv().await.unwrap().unwrap(), STATUS);
    }

    #[tokio::test]
    async fn heartbeat_reaches_the_server() {
        let (url, received) = game_server(vec![], false).await;
        let connector = WebSocketConnector::new(Duration::from_secs(5));

        let mut socket = connector.connect(&url).await.unwrap();
        socket.send(HEARTBEAT.to_string()).await.unwrap();
        socket.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while received.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*received.lock().unwrap(), vec![HEARTBEAT.to_string()]);
    }

    #[tokio::test]
    async fn closed_socket_rejects_sends() {
        let (url, _) = game_server(vec![], false).await;

        let mut socket = WebSocketTransport::connect(&url).await.unwrap();
        socket.close().await.unwrap();
        assert!(socket.close().await.is_ok());
        assert!(matches!(
            socket.send(HEARTBEAT.to_string()).await,
            Err(ScoreboardError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn connector_gives_up_after_its_timeout() {
        // TEST-NET-1 is never routable, so the dial hangs until the timeout.
        let connector = WebSocketConnector::new(Duration::from_millis(50));
        let result = connector.connect("ws://192.0.2.1:9/ws/game/1").await;
        assert!(matches!(
            result,
            Err(ScoreboardError::Timeout | ScoreboardError::Io(_))
        ));
    }
}
