//! Error types for the scoreboard synchronization client.

use thiserror::Error;

/// Errors that can occur while synchronizing live game status.
#[derive(Debug, Error)]
pub enum ScoreboardError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A property-list payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Attempted an operation that requires an open connection.
    #[error("not connected to game instance")]
    NotConnected,

    /// A second `connect` was issued while one is still in flight.
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP pull client failed before a response envelope could be built.
    #[cfg(feature = "http-api")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures while turning a property-list document into a [`GameStatus`](crate::status::GameStatus).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The document is not well-formed property-list XML.
    #[error("malformed property list: {0}")]
    Plist(#[from] plist::Error),

    /// The document (or a nested element) is not a dictionary where one is required.
    #[error("expected a dictionary at `{0}`")]
    NotADictionary(&'static str),

    /// A required key is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A key is present but holds a value of the wrong type.
    #[error("invalid value for field `{field}`: expected {expected}")]
    InvalidField {
        /// Name of the offending key.
        field: &'static str,
        /// Human-readable description of the accepted types.
        expected: &'static str,
    },
}

/// A specialized [`Result`] type for scoreboard synchronization operations.
pub type Result<T> = std::result::Result<T, ScoreboardError>;
