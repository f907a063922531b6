//! Transport abstraction for the game-status push channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel to a
//! single game instance. Because the client must be able to dial again after
//! an unexpected close, connection setup lives behind a separate
//! [`Connector`] trait that produces fresh transports on demand.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use scoreboard_sync::error::ScoreboardError;
//! use scoreboard_sync::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ScoreboardError> {
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ScoreboardError>> {
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ScoreboardError> {
//!         unimplemented!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ScoreboardError> {
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ScoreboardError;

/// A bidirectional text message transport to one game instance.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame.
/// Each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the connection loop
/// polls it inside `tokio::select!` next to the heartbeat timer, so a
/// cancelled `recv` must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ScoreboardError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), ScoreboardError>;

    /// Receive the next text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the server closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, ScoreboardError>>;

    /// Close the connection gracefully. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Resources are released
    /// regardless.
    async fn close(&mut self) -> Result<(), ScoreboardError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), ScoreboardError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, ScoreboardError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), ScoreboardError> {
        (**self).close().await
    }
}

/// Produces connected transports.
///
/// The client calls [`connect`](Connector::connect) once for the initial
/// connection and once per reconnection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established. During
    /// reconnection this counts as another unexpected close.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ScoreboardError>;
}
