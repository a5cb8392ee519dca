//! WebSocket transport
//!
//! Each socket gets a reader loop (this task) and a writer task draining the
//! connection's outbound queue. Binary messages are decoded as lossy UTF-8
//! and handled like text; outbound frames are always text.

use crate::server::connections::Frame;
use crate::server::relay::RelayEngine;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WsState {
    pub engine: RelayEngine,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

/// Create the WebSocket router
pub fn create_router(state: WsState) -> Router {
    // Any path other than /health upgrades, like a bare `ws` server
    Router::new()
        .route("/health", get(health_handler))
        .fallback(ws_handler)
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Frame>(state.outbound_buffer.max(1));
    let conn = state.engine.accept(tx);
    let conn_id = conn.id;

    // Spawn task to forward outbound frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Frames from one socket are handled strictly in order
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                state.engine.handle_frame(&conn, text);
            }
            Ok(Message::Binary(data)) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                state.engine.handle_frame(&conn, Frame::from(text));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Handled automatically by axum
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    debug!(conn_id = %conn_id, "WebSocket reader finished");
    state.engine.disconnect(&conn);
    send_task.abort();
}
