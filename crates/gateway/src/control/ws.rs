//! WebSocket endpoint for control-plane clients.
//!
//! Every text frame is a control request answered by a response with the
//! same `correlation_id`.  Requests run concurrently, so responses may
//! arrive out of order.  Lifecycle broadcasts are interleaved with
//! responses on the same socket.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use super::dispatch::{broadcast, handle_text};
use crate::state::AppState;

/// GET /v1/control/ws: upgrade to WebSocket.  Auth is enforced by the
/// bearer-token middleware on the route.
pub async fn control_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let client_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(client_id = %client_id, "control client connected");

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut events = state.manager.subscribe();
    let events_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(text) = to_text(&broadcast(event)) else { continue };
            if events_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let state = state.clone();
                let tx = out_tx.clone();
                tokio::spawn(async move {
                    let resp = handle_text(&state, &text).await;
                    if let Some(text) = to_text(&resp) {
                        let _ = tx.send(text).await;
                    }
                });
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    forwarder.abort();
    writer.abort();
    tracing::info!(client_id = %client_id, "control client disconnected");
}

fn to_text<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize control frame");
            None
        }
    }
}
