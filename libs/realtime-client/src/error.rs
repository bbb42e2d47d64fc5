//! Error types for the realtime client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Why a connection attempt failed
///
/// Cloneable so that every caller awaiting the same in-flight attempt
/// observes an identical outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The socket could not be opened or failed before the broker acknowledged
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker answered the handshake with an ERROR frame
    #[error("broker rejected connection: {0}")]
    Protocol(String),

    /// The socket closed before the CONNECTED frame arrived
    #[error("connection closed during handshake: {0}")]
    Closed(String),

    /// `disconnect()` was called while the attempt was in flight
    #[error("connection attempt aborted")]
    Aborted,
}

impl ConnectionError {
    /// Every connection failure is retried by the reconnect loop
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::Aborted)
    }
}

/// Errors surfaced to callers of the realtime client
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A user-initiated send was attempted without a live connection
    #[error("not connected to the realtime broker")]
    NotConnected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Inbound frame that could not be turned into an event
///
/// Never surfaced to subscribers; the multiplexer logs and drops the frame.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("invalid payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}
