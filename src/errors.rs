use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("connection failed: {reason}")]
    Connection { reason: String },

    #[error("handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl NotifyError {
    pub fn connection(reason: impl Into<String>) -> Self {
        NotifyError::Connection {
            reason: reason.into(),
        }
    }

    /// Whether the error was raised while establishing a session, as opposed
    /// to during an established one.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            NotifyError::Connection { .. }
                | NotifyError::ConnectTimeout(_)
                | NotifyError::Endpoint(_)
                | NotifyError::Http(_)
                | NotifyError::WebSocket(_)
        )
    }
}

pub type Result<T, E = NotifyError> = std::result::Result<T, E>;
