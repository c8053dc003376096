//! Transport tests against real local servers: a tokio-tungstenite listener
//! for the streaming transport and wiremock for long-polling.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use estate_notify::config::{Config, ConnectionConfig};
use estate_notify::protocol::{decode_frame, ClientMessage};
use estate_notify::transport::{
    Connector, DisconnectReason, Inbound, NegotiatingConnector, PollingConnector, TransportKind,
    WebSocketConnector,
};
use estate_notify::{EventName, Identity, NotificationSession};

fn lead_envelope(message: &str) -> Value {
    json!({
        "event": "newLead",
        "data": {
            "type": "new_lead",
            "title": "New lead",
            "message": message,
            "timestamp": "2024-03-01T12:00:00Z",
        }
    })
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .reconnect_delay(Duration::from_millis(10))
        .poll_interval(Duration::from_millis(10))
        .build()
}

mod websocket_tests {
    use super::*;

    /// Accepts connections forever. Each reports its first client frame;
    /// the first connection then pushes one lead and closes.
    async fn spawn_push_server() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (first_frames, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut served = 0;
            while let Ok((stream, _)) = listener.accept().await {
                served += 1;
                let first_frames = first_frames.clone();
                let close_after_push = served == 1;
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    if let Some(Ok(Message::Text(text))) = ws.next().await {
                        let _ = first_frames.send(text);
                    }
                    if close_after_push {
                        ws.send(Message::Text(lead_envelope("over ws").to_string()))
                            .await
                            .unwrap();
                        let _ = ws.close(None).await;
                    }
                    while ws.next().await.is_some() {}
                });
            }
        });

        (format!("http://{}", addr), rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("server saw no frame")
            .expect("server stopped");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_join_delivery_and_reconnect_after_server_close() {
        let (base_url, mut first_frames) = spawn_push_server().await;
        let mut cfg = Config::with_api_url(base_url);
        cfg.connection = fast_config();

        let session = NotificationSession::new(
            &cfg,
            Identity::agent("a1"),
            Arc::new(WebSocketConnector::new()),
        );
        session.try_start().await.unwrap();
        assert_eq!(
            session.connection().transport(),
            Some(TransportKind::WebSocket)
        );

        let join = next_frame(&mut first_frames).await;
        assert_eq!(
            join,
            json!({ "event": "join", "data": { "userId": "a1", "userType": "agent" } })
        );

        let mut changes = session.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.notifications().is_empty() {
                changes.changed().await.unwrap();
            }
        })
        .await
        .expect("lead never delivered");
        assert_eq!(session.notifications()[0].event.message, "over ws");

        // The server closed the first socket; the client rejoins on a new one.
        let rejoin = next_frame(&mut first_frames).await;
        assert_eq!(rejoin["event"], "join");
        assert_eq!(rejoin["data"]["userId"], "a1");
    }

    #[tokio::test]
    async fn test_refused_endpoint_fails_fast() {
        // Bind then drop so the port is very likely closed.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = WebSocketConnector::new()
            .open(&format!("http://{}", addr), &ConnectionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(err.is_handshake_failure());
    }
}

mod polling_tests {
    use super::*;

    async fn mount_handshake(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/notifications/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sid": "s1" })))
            .mount(server)
            .await;
    }

    async fn mount_outbound(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/notifications/poll"))
            .and(query_param("sid", "s1"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1)
            .mount(server)
            .await;
    }

    async fn mount_one_batch_then_gone(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/notifications/poll"))
            .and(query_param("sid", "s1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([lead_envelope("over polling")])),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/notifications/poll"))
            .and(query_param("sid", "s1"))
            .respond_with(ResponseTemplate::new(410))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_poll_batch_then_server_close() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        mount_outbound(&server).await;
        mount_one_batch_then_gone(&server).await;

        let mut session = PollingConnector::new()
            .open(&server.uri(), &fast_config())
            .await
            .unwrap();
        assert_eq!(session.kind(), TransportKind::Polling);

        let Inbound::Frame(text) = session.recv().await else {
            panic!("expected a frame first");
        };
        let event = decode_frame(&text).unwrap();
        assert_eq!(event.name(), EventName::NewLead);

        assert_eq!(
            session.recv().await,
            Inbound::Closed(DisconnectReason::ServerInitiated)
        );
    }

    #[tokio::test]
    async fn test_outbound_frames_are_posted_with_sid() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        mount_outbound(&server).await;
        mount_one_batch_then_gone(&server).await;

        let session = PollingConnector::new()
            .open(&server.uri(), &fast_config())
            .await
            .unwrap();
        session
            .sender()
            .send(ClientMessage::Join(Identity::agent("a1")))
            .await
            .unwrap();

        let mut posted = None;
        for _ in 0..100 {
            let requests = server.received_requests().await.unwrap_or_default();
            posted = requests.into_iter().find(|r| {
                r.method.as_str() == "POST" && r.url.query() == Some("sid=s1")
            });
            if posted.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let body: Value = serde_json::from_slice(&posted.expect("join never posted").body).unwrap();
        assert_eq!(
            body,
            json!({ "event": "join", "data": { "userId": "a1", "userType": "agent" } })
        );
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_a_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notifications/poll"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = PollingConnector::new()
            .open(&server.uri(), &ConnectionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_negotiation_falls_back_to_polling() {
        // wiremock speaks plain HTTP, so the websocket upgrade is refused.
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        mount_outbound(&server).await;
        mount_one_batch_then_gone(&server).await;

        let session = NegotiatingConnector::default()
            .open(&server.uri(), &fast_config())
            .await
            .unwrap();
        assert_eq!(session.kind(), TransportKind::Polling);
    }
}
