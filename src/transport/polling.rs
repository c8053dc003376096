//! Long-polling fallback transport.
//!
//! - `POST {base}/notifications/poll` → `{"sid": "..."}` (handshake)
//! - `GET  {base}/notifications/poll?sid=...` → `[envelope, ...]`
//! - `POST {base}/notifications/poll?sid=...` with one envelope (client → server)
//!
//! `404`/`410` on a poll means the server dropped the session.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Connector, DisconnectReason, Inbound, Session, TransportKind};
use crate::config::ConnectionConfig;
use crate::errors::{NotifyError, Result};
use crate::protocol::ClientMessage;

pub const POLL_PATH: &str = "/notifications/poll";

/// Upper bound on a single long-poll request; the server is expected to
/// answer (possibly with an empty batch) well before this.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Handshake {
    sid: String,
}

#[derive(Clone)]
pub struct PollingConnector {
    client: reqwest::Client,
}

impl PollingConnector {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(POLL_REQUEST_TIMEOUT)
                .user_agent("estate-notify/0.1")
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for PollingConnector {
    fn default() -> Self {
        Self::new()
    }
}

pub fn poll_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), POLL_PATH)
}

fn session_url(base_url: &str, sid: &str) -> String {
    format!("{}?sid={}", poll_url(base_url), urlencoding::encode(sid))
}

#[async_trait]
impl Connector for PollingConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn open(&self, base_url: &str, config: &ConnectionConfig) -> Result<Session> {
        let resp = self.client.post(poll_url(base_url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::connection(format!(
                "polling handshake rejected: status={}, body={}",
                status, body
            )));
        }
        let handshake: Handshake = resp.json().await?;
        let url = session_url(base_url, &handshake.sid);

        tracing::info!(sid = %handshake.sid, "polling: session opened");

        let (in_tx, in_rx) = mpsc::channel::<Inbound>(config.channel_capacity);
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(config.channel_capacity);
        let interval = config.poll_interval();

        let poll_client = self.client.clone();
        let poll_url = url.clone();
        let poller = tokio::spawn(async move {
            let reason = loop {
                match poll_once(&poll_client, &poll_url).await {
                    Ok(frames) => {
                        for frame in frames {
                            if in_tx.send(Inbound::Frame(frame.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(reason) => break reason,
                }
                tokio::time::sleep(interval).await;
            };
            let _ = in_tx.send(Inbound::Closed(reason)).await;
        });

        let send_client = self.client.clone();
        let sender = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let result = send_client.post(&url).json(&msg).send().await;
                match result {
                    Ok(resp) if resp.status().is_success() => {
                        tracing::debug!(kind = msg.kind(), "polling: frame sent");
                    }
                    Ok(resp) => {
                        tracing::warn!(kind = msg.kind(), status = %resp.status(), "polling: send rejected");
                    }
                    Err(e) => {
                        tracing::warn!(kind = msg.kind(), "polling: send failed: {}", e);
                    }
                }
            }
        });

        Ok(Session::new(TransportKind::Polling, in_rx, out_tx)
            .with_task(poller)
            .with_task(sender))
    }
}

async fn poll_once(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<Vec<Value>, DisconnectReason> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| DisconnectReason::Transport(e.to_string()))?;

    match resp.status() {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(DisconnectReason::ServerInitiated),
        StatusCode::NO_CONTENT => Ok(Vec::new()),
        status if status.is_success() => resp
            .json::<Vec<Value>>()
            .await
            .map_err(|e| DisconnectReason::Transport(format!("bad poll body: {}", e))),
        status => Err(DisconnectReason::Transport(format!(
            "poll failed with status {}",
            status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_urls() {
        assert_eq!(
            poll_url("http://localhost:5000/"),
            "http://localhost:5000/notifications/poll"
        );
        assert_eq!(
            session_url("http://localhost:5000", "a b"),
            "http://localhost:5000/notifications/poll?sid=a%20b"
        );
    }
}
