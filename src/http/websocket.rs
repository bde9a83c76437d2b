//! WebSocket upgrade and per-connection tasks.
//!
//! # Responsibilities
//! - Check the upgrade's origin before anything else
//! - Register the connection with the hub
//! - Run one reader task and one writer task per connection
//!
//! # Data Flow
//! ```text
//! Client ──frames──→ reader loop ──→ ConnectionManager::handle_message
//! Client ←─frames─── writer loop ←── WsSocket channel ←── backpressure
//! ```
//!
//! # Design Decisions
//! - The writer is the only task touching the sink; everything else goes
//!   through the `WsSocket` channel
//! - When the writer catches up it drains the client's backpressure queue
//! - Either loop ending terminates the other through the socket's token

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use tokio::sync::mpsc;

use crate::http::server::AppState;
use crate::hub::ConnectionManager;
use crate::net::socket::CLOSE_POLICY_VIOLATION;
use crate::net::{ClientId, ClientSocket, DisconnectReason, Frame, WsSocket};
use crate::observability::metrics;

/// `GET {websocket.path}`: origin check, then upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    if !state.origins.is_allowed(origin) {
        tracing::warn!(
            remote_addr = %remote_addr,
            origin = origin.unwrap_or("<none>"),
            "Rejected WebSocket upgrade from disallowed origin"
        );
        metrics::record_connection_rejected("origin");
        return ws.on_upgrade(|socket| {
            close_immediately(socket, CLOSE_POLICY_VIOLATION, "Origin not allowed")
        });
    }

    let manager = state.manager.clone();
    ws.on_upgrade(move |socket| run_session(socket, remote_addr, manager))
}

async fn close_immediately(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Drive one registered connection until either side ends it.
pub async fn run_session(socket: WebSocket, remote_addr: SocketAddr, manager: Arc<ConnectionManager>) {
    let config = manager.websocket_config();
    let (ws_socket, frames) =
        WsSocket::new(config.outbound_channel_capacity, config.write_buffer_bytes);

    let client_id = match manager.register(ws_socket.clone(), remote_addr) {
        Ok(id) => id,
        Err(e) => {
            let mut socket = socket;
            let frame = CloseFrame {
                code: e.close_code(),
                reason: Utf8Bytes::from(e.to_string()),
            };
            if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                tracing::debug!(remote_addr = %remote_addr, error = %e, "Failed to send close frame");
            }
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        frames,
        ws_socket.clone(),
        manager.clone(),
        client_id,
    ));

    let reason = loop {
        let next = tokio::select! {
            _ = ws_socket.terminated() => {
                break DisconnectReason::SocketError("connection terminated".into());
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => manager.handle_message(client_id, text.as_str()),
            Some(Ok(Message::Binary(data))) => manager.handle_binary(client_id, &data),
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => manager.record_pong(client_id),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(
                    client_id = %client_id,
                    code = frame.as_ref().map(|f| f.code),
                    "Client sent close frame"
                );
                break DisconnectReason::ClientClosed;
            }
            Some(Err(e)) => break DisconnectReason::SocketError(e.to_string()),
            None => break DisconnectReason::ClientClosed,
        }
    };

    ws_socket.terminate();
    manager.disconnect(client_id, reason);
    if let Err(e) = writer.await {
        tracing::error!(client_id = %client_id, error = %e, "Writer task panicked");
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Frame>,
    socket: Arc<WsSocket>,
    manager: Arc<ConnectionManager>,
    client_id: ClientId,
) {
    loop {
        let frame = tokio::select! {
            _ = socket.terminated() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = match frame {
            Frame::Text(text) => {
                let len = text.len();
                let result = sink.send(Message::Text(text.to_string().into())).await;
                socket.mark_written(len);
                result
            }
            Frame::Ping => sink.send(Message::Ping(Bytes::new())).await,
            Frame::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: Utf8Bytes::from(reason),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(client_id = %client_id, error = %e, "Failed to send close frame");
                }
                break;
            }
        };

        if let Err(e) = result {
            tracing::debug!(client_id = %client_id, error = %e, "WebSocket write failed");
            socket.terminate();
            break;
        }

        let backpressure = manager.backpressure();
        if socket.buffered_amount() == 0 && backpressure.has_queued(&client_id) {
            backpressure.flush_client(client_id, &*socket);
        }
    }
}
