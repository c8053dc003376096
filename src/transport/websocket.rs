//! Streaming transport over a single WebSocket.
//!
//! `http(s)://host` becomes `ws(s)://host/notifications/ws`. Each text frame
//! carries one JSON envelope. A Close frame from the server is a deliberate
//! server disconnect; errors or EOF without Close count as abnormal.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{Connector, DisconnectReason, Inbound, Session, TransportKind};
use crate::config::ConnectionConfig;
use crate::errors::{NotifyError, Result};
use crate::protocol::ClientMessage;

pub const WS_PATH: [&str; 2] = ["notifications", "ws"];

#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Normalize: HTTP → WS, HTTPS → WSS, then append the push path.
pub fn build_ws_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim_end_matches('/'))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(NotifyError::connection(format!(
                "unsupported scheme '{}' for push endpoint",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| NotifyError::connection("cannot rewrite endpoint scheme"))?;
    url.path_segments_mut()
        .map_err(|_| NotifyError::connection("endpoint cannot be a base URL"))?
        .pop_if_empty()
        .extend(WS_PATH);
    Ok(url)
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn open(&self, base_url: &str, config: &ConnectionConfig) -> Result<Session> {
        let url = build_ws_url(base_url)?;
        let (ws, _resp) = connect_async(url.as_str()).await?;

        tracing::info!(url = %url, "websocket: connected");

        let (mut sink, mut stream) = ws.split();
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(config.channel_capacity);
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(config.channel_capacity);

        let reader_tx = in_tx.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if reader_tx.send(Inbound::Frame(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if reader_tx.send(Inbound::Frame(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => tracing::warn!("websocket: dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "websocket: server sent close frame");
                        break DisconnectReason::ServerInitiated;
                    }
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break DisconnectReason::Transport(e.to_string()),
                    None => break DisconnectReason::Transport("stream ended".into()),
                }
            };
            let _ = reader_tx.send(Inbound::Closed(reason)).await;
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(kind = msg.kind(), "websocket: failed to encode frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(kind = msg.kind(), "websocket: send failed: {}", e);
                    let _ = in_tx
                        .send(Inbound::Closed(DisconnectReason::Transport(e.to_string())))
                        .await;
                    return;
                }
            }
            let _ = sink.close().await;
        });

        Ok(Session::new(TransportKind::WebSocket, in_rx, out_tx)
            .with_task(reader)
            .with_task(writer))
    }
}
