//! Change-Event WebSocket
//!
//! Streams registry change events to connected clients. Each connection
//! reads from its own broadcast receiver; a lagging client loses the
//! oldest events (the broadcast channel's lag semantics) and stays
//! connected.

use crate::registry::ChangeEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// `GET /v1/events` — upgrade to a WebSocket of change events.
pub async fn events(
    ws: WebSocketUpgrade,
    Extension(events): Extension<broadcast::Sender<ChangeEvent>>,
) -> Response {
    let rx = events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx))
}

async fn stream_events(mut socket: WebSocket, mut rx: broadcast::Receiver<ChangeEvent>) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(text)).await.is_err() {
                        debug!("event subscriber disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    // Slow consumer: events were dropped, keep streaming.
                    warn!(dropped = count, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Registry bridge shut down with the server.
                    break;
                }
            },
            message = socket.recv() => match message {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
