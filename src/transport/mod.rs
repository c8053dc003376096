//! Push transports.
//!
//! A [`Connector`] performs the handshake and hands back a [`Session`]: a pair
//! of bounded channels plus the pump tasks driving the underlying socket.
//! The connection layer only ever talks to sessions, so streaming and polling
//! transports (and in-memory test transports) are interchangeable.

pub mod polling;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::config::ConnectionConfig;
use crate::errors::{NotifyError, Result};
use crate::protocol::ClientMessage;

pub use polling::PollingConnector;
pub use websocket::WebSocketConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Polling,
    Memory,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Polling => write!(f, "polling"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the session deliberately.
    ServerInitiated,
    /// Read/write failure or the stream ended without a close.
    Transport(String),
    /// The local side asked for it.
    ClientInitiated,
}

impl DisconnectReason {
    /// Local disconnects never trigger reconnection.
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, DisconnectReason::ClientInitiated)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerInitiated => write!(f, "server disconnect"),
            Self::Transport(reason) => write!(f, "transport error: {}", reason),
            Self::ClientInitiated => write!(f, "client disconnect"),
        }
    }
}

/// What a session delivers upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One JSON envelope as text.
    Frame(String),
    Closed(DisconnectReason),
}

/// An established session. Dropping it aborts the pump tasks.
pub struct Session {
    kind: TransportKind,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<ClientMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        kind: TransportKind,
        inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<ClientMessage>,
    ) -> Self {
        Self {
            kind,
            inbound,
            outbound,
            tasks: Vec::new(),
        }
    }

    /// Ties a pump task's lifetime to the session.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outbound.clone()
    }

    /// Next inbound item. A closed channel without an explicit close is
    /// reported as a transport failure.
    pub async fn recv(&mut self) -> Inbound {
        self.inbound.recv().await.unwrap_or_else(|| {
            Inbound::Closed(DisconnectReason::Transport("session channel closed".into()))
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens sessions against the push server at `base_url`.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn open(&self, base_url: &str, config: &ConnectionConfig) -> Result<Session>;
}

/// Tries each connector in order and returns the first session that opens.
pub struct NegotiatingConnector {
    connectors: Vec<Arc<dyn Connector>>,
}

impl NegotiatingConnector {
    pub fn new(connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self { connectors }
    }
}

impl Default for NegotiatingConnector {
    /// Streaming first, long-polling as the fallback.
    fn default() -> Self {
        Self::new(vec![
            Arc::new(WebSocketConnector::new()),
            Arc::new(PollingConnector::new()),
        ])
    }
}

#[async_trait]
impl Connector for NegotiatingConnector {
    fn kind(&self) -> TransportKind {
        self.connectors
            .first()
            .map(|c| c.kind())
            .unwrap_or(TransportKind::WebSocket)
    }

    /// Each transport gets an equal share of whatever is left of the
    /// connect timeout, so a hanging streaming handshake still leaves time
    /// for the fallback.
    async fn open(&self, base_url: &str, config: &ConnectionConfig) -> Result<Session> {
        let deadline = Instant::now() + config.connect_timeout();
        let mut last_err = None;
        for (i, connector) in self.connectors.iter().enumerate() {
            let remaining = self.connectors.len() - i;
            let share = deadline.saturating_duration_since(Instant::now()) / remaining as u32;
            let attempt = match timeout(share, connector.open(base_url, config)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::ConnectTimeout(share)),
            };
            match attempt {
                Ok(session) => {
                    tracing::debug!(transport = %connector.kind(), "transport negotiated");
                    return Ok(session);
                }
                Err(e) => {
                    tracing::debug!(
                        transport = %connector.kind(),
                        error = %e,
                        "transport unavailable, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NotifyError::connection("no transports configured")))
    }
}
