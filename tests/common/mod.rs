#![allow(dead_code)]

use std::time::Duration;

use reader_gateway::{
    config::GatewayConfig,
    domain::MemoryStore,
    gateway::{ConnectionId, ConnectionManager, FrameSender, GatewayServices},
    protocol::{EventType, FrameKind, Message, ReaderCredentials},
    server::{Server, ServerConfig},
};
use serde_json::{Value, json};
use tokio::{sync::mpsc, time::timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Gateway backed by an in-memory store with short timings.
pub struct TestGateway {
    pub store: MemoryStore,
    pub manager: ConnectionManager,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig {
            settle_delay_ms: 20,
            ..Default::default()
        })
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let store = MemoryStore::new();
        let services = GatewayServices::from_store(store.clone(), config);
        Self {
            store,
            manager: ConnectionManager::new(services),
        }
    }

    pub fn connect(&self) -> FakeReader {
        let link = self.manager.open();
        FakeReader {
            id: link.id,
            frames: link.frames,
            outbound: link.outbound,
        }
    }

    pub async fn wait_for_state(&self, reader: &FakeReader, state: &str) {
        let reached = timeout(RECV_TIMEOUT, async {
            loop {
                if self
                    .manager
                    .status(reader.id)
                    .is_some_and(|status| status.state == state)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "connection never reached state {state}, last status: {:?}",
            self.manager.status(reader.id)
        );
    }
}

/// Drives one connection the way a reader device would.
pub struct FakeReader {
    pub id: ConnectionId,
    frames: FrameSender,
    outbound: mpsc::UnboundedReceiver<Message>,
}

impl FakeReader {
    pub fn send_raw(&self, frame: impl Into<String>) {
        self.frames.push(frame);
    }

    pub fn event(&self, kind: &str, payload: Value) {
        self.send_raw(json!({ "event": "EVENT", "data": { "type": kind, "payload": payload } }).to_string());
    }

    pub fn response(&self, kind: &str, payload: Value) {
        self.send_raw(
            json!({ "event": "RESPONSE", "data": { "type": kind, "payload": payload } }).to_string(),
        );
    }

    pub fn heartbeat(&self) {
        self.send_raw(r#"{"event":"HEARTBEAT"}"#);
    }

    pub fn close(&self) {
        self.frames.close();
    }

    pub async fn recv(&mut self) -> Message {
        timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
    }

    /// Receives the next frame and checks its type.
    pub async fn expect(&mut self, kind: EventType) -> Message {
        let message = self.recv().await;
        assert_eq!(message.kind(), kind, "unexpected frame {message:?}");
        message
    }

    /// Skips frames until one of the given type arrives.
    pub async fn skip_to(&mut self, kind: EventType) -> Message {
        loop {
            let message = self.recv().await;
            if message.kind() == kind {
                return message;
            }
        }
    }

    /// Asserts nothing is sent within a short window.
    pub async fn expect_silence(&mut self) {
        let received = timeout(Duration::from_millis(100), self.outbound.recv()).await;
        assert!(received.is_err(), "unexpected frame {received:?}");
    }

    pub async fn wait_closed(&mut self) {
        let closed = timeout(Duration::from_secs(5), async {
            while self.outbound.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "connection was not closed");
    }

    pub async fn register(&mut self) -> ReaderCredentials {
        self.event("REGISTER", json!({}));
        let message = self.expect(EventType::Register).await;
        assert_eq!(message.event, FrameKind::Response);
        message.data.payload_as().unwrap()
    }

    pub async fn authenticate(&mut self, credentials: &ReaderCredentials) {
        self.event("AUTHENTICATE", serde_json::to_value(credentials).unwrap());
        let message = self.expect(EventType::ReaderAuthenticated).await;
        assert_eq!(message.event, FrameKind::Response);
    }

    pub async fn register_and_authenticate(&mut self) -> ReaderCredentials {
        let credentials = self.register().await;
        self.authenticate(&credentials).await;
        credentials
    }
}

/// Spawns a server on a random port and returns its `host:port`.
pub async fn spawn_server(gateway: ConnectionManager) -> String {
    let server_config = ServerConfig {
        host: "127.0.0.1",
        port: 0,
    };
    let server = Server::new(gateway, server_config).await.unwrap();

    let port = server.port().unwrap();
    tokio::spawn(async move {
        server.run().await.expect("failed to run server");
    });

    format!("127.0.0.1:{port}")
}
