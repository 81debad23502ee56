//! Inbound peer connections over WebSocket.
//!
//! Each WebSocket message carries one authenticated mesh envelope; the
//! connection plugs into the same mesh entry points as TCP links.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::AppState;

/// `GET /ws/p2p`
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let mesh = state.mesh.clone();
    let handle = mesh.register_connection("ws".to_string());
    let (mut sink, mut stream) = socket.split();

    let writer_handle = handle.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = writer_handle.next_outbound().await {
            if sink.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Binary(bytes) => mesh.handle_incoming(&handle, &bytes).await,
            Message::Text(text) => mesh.handle_incoming(&handle, text.as_bytes()).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    debug!("ws peer disconnected");
    mesh.connection_closed(&handle);
    writer.abort();
}
