use tokio::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Closed by the caller.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct InternalState {
    pub state: ConnectionState,
    /// Failed attempts since the last successful handshake.
    pub reconnect_attempts: u32,
    /// When the last inbound frame arrived, on any session.
    pub last_message: Option<Instant>,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_message: None,
        }
    }
}

impl InternalState {
    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.reconnect_attempts = 0;
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Records the start of one more reconnection attempt and returns its
    /// 1-based number.
    pub fn mark_reconnecting(&mut self) -> u32 {
        self.state = ConnectionState::Reconnecting;
        self.reconnect_attempts += 1;
        self.reconnect_attempts
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn record_message(&mut self) {
        self.last_message = Some(Instant::now());
    }
}
