//! WebSocket endpoint for transport bridges.
//!
//! Flow:
//! 1. Bridge connects to `/v1/bridge/ws?token=<pre-shared-token>`
//! 2. Bridge sends `bridge_hello`
//! 3. Gateway responds with `bridge_welcome`
//! 4. Message loop: gateway sends `open_session`/`request`, bridge sends
//!    `session_event`/`response`, both exchange `ping`/`pong`

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use lh_protocol::{BridgeMessage, PROTOCOL_VERSION};

use super::connector::transport_event;
use super::registry::{BridgeRegistry, ConnectedBridge};
use crate::state::AppState;

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
pub(crate) fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /v1/bridge/ws: upgrade to WebSocket.
///
/// When the env var named by `server.bridge_token_env` is set, `?token=`
/// must match it.  Unset means open access (dev mode).
pub async fn bridge_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(expected) = state.bridge_token.as_deref() {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_eq(provided, expected) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing bridge token",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let hello_timeout = Duration::from_secs(state.config.bridge.hello_timeout_secs);
    let Some(hello) = wait_for_hello(&mut ws_stream, hello_timeout).await else {
        tracing::warn!("bridge disconnected before sending bridge_hello");
        return;
    };

    if hello.protocol_version != 0 && hello.protocol_version != PROTOCOL_VERSION {
        tracing::warn!(
            bridge_id = %hello.bridge_id,
            protocol_version = hello.protocol_version,
            expected = PROTOCOL_VERSION,
            "bridge protocol version mismatch, continuing"
        );
    }

    let welcome = BridgeMessage::BridgeWelcome {
        protocol_version: PROTOCOL_VERSION,
        gateway_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if send_ws_message(&mut ws_sink, &welcome).await.is_err() {
        tracing::warn!(bridge_id = %hello.bridge_id, "failed to send bridge_welcome");
        return;
    }

    let bridge_id = hello.bridge_id;
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<BridgeMessage>(64);

    state.bridges.register(ConnectedBridge {
        bridge_id: bridge_id.clone(),
        version: hello.version,
        connected_at: Utc::now(),
        last_seen: Utc::now(),
        sink: outbound_tx,
    });

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    let registry = state.bridges.clone();
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<BridgeMessage>(&text) {
                Ok(bridge_msg) => handle_inbound(&registry, &bridge_id, bridge_msg).await,
                Err(e) => {
                    tracing::debug!(bridge_id = %bridge_id, error = %e, "ignoring unparseable message")
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => registry.touch(&bridge_id),
            _ => {}
        }
    }

    let closed = registry.disconnect(&bridge_id).await;
    writer.abort();
    tracing::info!(
        bridge_id = %bridge_id,
        closed_sessions = closed,
        "bridge disconnected"
    );
}

struct Hello {
    bridge_id: String,
    version: String,
    protocol_version: u32,
}

async fn wait_for_hello(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    timeout: Duration,
) -> Option<Hello> {
    let waited = tokio::time::timeout(timeout, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(BridgeMessage::BridgeHello {
                    bridge_id,
                    version,
                    protocol_version,
                }) = serde_json::from_str::<BridgeMessage>(&text)
                {
                    return Some(Hello {
                        bridge_id,
                        version,
                        protocol_version,
                    });
                }
            }
        }
        None
    })
    .await;

    waited.unwrap_or(None)
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &BridgeMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn handle_inbound(registry: &Arc<BridgeRegistry>, bridge_id: &str, msg: BridgeMessage) {
    registry.touch(bridge_id);

    match msg {
        BridgeMessage::SessionEvent { session_id, event } => {
            if let Some(ev) = transport_event(&session_id, event) {
                registry.deliver(bridge_id, &session_id, ev).await;
            }
        }
        BridgeMessage::Response {
            request_id,
            success,
            result,
            error,
        } => registry.complete_request(&request_id, success, result, error),
        BridgeMessage::Ping { timestamp } => {
            if let Some(sink) = registry.get_sink(bridge_id) {
                let _ = sink.send(BridgeMessage::Pong { timestamp }).await;
            }
        }
        BridgeMessage::Pong { .. } => {}
        other => tracing::debug!(
            bridge_id = %bridge_id,
            msg = ?other,
            "unexpected inbound message type"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_eq_matches_exact_tokens_only() {
        assert!(token_eq("secret", "secret"));
        assert!(!token_eq("secret", "secre"));
        assert!(!token_eq("", "secret"));
    }
}
