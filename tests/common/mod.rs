//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use execution_relay::{ConnectionManager, HttpServer, Notifier, RelayConfig, Shutdown};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DASHBOARD_ORIGIN: &str = "http://localhost:3000";

/// A relay running on an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub notifier: Arc<Notifier>,
    pub manager: Arc<ConnectionManager>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestRelay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the relay and wait for `run` to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.handle).await;
    }
}

pub async fn start_relay(mut config: RelayConfig) -> TestRelay {
    config.listener.bind_address = "127.0.0.1:0".into();
    config.websocket.close_timeout_ms = 500;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config);
    let notifier = server.notifier();
    let manager = server.manager();
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();

    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        let _ = server.run(listener, config_updates, &server_shutdown).await;
    });

    TestRelay {
        addr,
        notifier,
        manager,
        shutdown,
        handle,
    }
}

/// Open a WebSocket, optionally with an `Origin` header.
pub async fn connect(relay: &TestRelay, origin: Option<&'static str>) -> Client {
    let mut request = relay.ws_url().into_client_request().unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(origin));
    }
    let (stream, _) = connect_async(request).await.unwrap();
    stream
}

/// Connect from the dashboard origin and consume the `connection` frame.
pub async fn connect_dashboard(relay: &TestRelay) -> (Client, String) {
    let mut client = connect(relay, Some(DASHBOARD_ORIGIN)).await;
    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "connection");
    let client_id = hello["clientId"].as_str().unwrap().to_string();
    (client, client_id)
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Next close frame's code, skipping anything else.
pub async fn next_close_code(client: &mut Client) -> Option<u16> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for close")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

pub async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .unwrap();
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
