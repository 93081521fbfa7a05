//! WebSocket support for live session streaming.
//!
//! Clients connect to `/ws` and receive tracker events as they happen:
//! session start, every applied sample, sample failures and the final
//! record (or the reason it was not recorded).

use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, debug, warn};

use super::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("🔌 WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Handle an individual WebSocket connection
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut rx = state.tracker.subscribe();

    // Send events to client
    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!("WS client lagged, {} events skipped", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Client disconnected
                    }
                }
                Err(e) => {
                    warn!("Failed to serialize WS event: {}", e);
                }
            }
        }
    });

    // Read from client (handle pings/close, ignore other messages)
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => {
                    debug!("WS ping received");
                    // Pong is auto-handled by axum
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("🔌 WebSocket client disconnected");
}
