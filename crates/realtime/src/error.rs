//! Error types for the connection manager.

use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Low-level failures of the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("invalid connect request: {0}")]
    InvalidRequest(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,
}

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager) and the
/// session clients built on it.
///
/// Cheap to clone so the same error can be returned to the caller and
/// delivered to `Error` listeners.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection already in progress")]
    ConnectionInProgress,

    #[error("transport error: {0}")]
    Transport(#[source] Arc<TransportError>),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] Arc<serde_json::Error>),

    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("not connected")]
    NotConnected,

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("no active session")]
    NoActiveSession,
}

impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self {
        ConnectionError::Transport(Arc::new(e))
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        ConnectionError::MalformedFrame(Arc::new(e))
    }
}
