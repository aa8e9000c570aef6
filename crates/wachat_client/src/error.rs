//! Error types for backend calls and the WebSocket transport.

use thiserror::Error;

/// Failure of a backend call or of the connection carrying it.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered the call with an error.
    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },

    #[error("{method} timed out waiting for a reply")]
    Timeout { method: String },

    #[error("connection closed")]
    Disconnected,
}

impl ClientError {
    pub fn remote(method: &str, message: impl Into<String>) -> Self {
        ClientError::Remote {
            method: method.to_string(),
            message: message.into(),
        }
    }
}
