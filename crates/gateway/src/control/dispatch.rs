//! Maps control requests onto the lifecycle manager and lifecycle events
//! onto broadcasts.

use chrono::{DateTime, Utc};
use lh_domain::Error;
use lh_protocol::{Broadcast, ControlEnvelope, ControlRequest, ControlResponse};
use lh_sessions::{SessionEvent, StartRequest};
use serde_json::{json, Value};

use crate::state::AppState;

/// Parse and execute one text frame.  Unparseable frames get a
/// `bad_request` response rather than closing the socket.
pub async fn handle_text(state: &AppState, text: &str) -> ControlResponse {
    match serde_json::from_str::<ControlEnvelope>(text) {
        Ok(envelope) => dispatch(state, envelope).await,
        Err(e) => {
            let correlation_id = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("correlation_id")?.as_str().map(str::to_owned));
            ControlResponse::err(correlation_id, "bad_request", format!("invalid request: {e}"))
        }
    }
}

pub async fn dispatch(state: &AppState, envelope: ControlEnvelope) -> ControlResponse {
    let ControlEnvelope {
        correlation_id: cid,
        request,
    } = envelope;
    let kind = request.kind();
    let session_id = request.session_id().to_owned();
    tracing::debug!(session_id = %session_id, request = kind, "control request");

    let manager = &state.manager;
    match request {
        ControlRequest::StartConnection {
            session_id,
            display_name,
            owner_id,
            credentials,
        } => {
            let prior_credentials = match credentials {
                Some(blob) => Some(blob),
                None => stored_credentials(state, &session_id).await,
            };
            let outcome = manager
                .start_connection(StartRequest {
                    id: session_id,
                    display_name,
                    owner_id,
                    prior_credentials,
                })
                .await;
            let data = serde_json::to_value(&outcome).unwrap_or_default();
            if outcome.success {
                ControlResponse::ok(cid, data)
            } else {
                let mut resp = ControlResponse::err(cid, "start_failed", outcome.message);
                resp.data = Some(data);
                resp
            }
        }
        ControlRequest::SendMessage {
            session_id,
            to,
            content,
        } => match manager.send(&session_id, &to, content).await {
            Ok(receipt) => ControlResponse::ok(cid, serde_json::to_value(&receipt).unwrap_or_default()),
            Err(e) => error_response(cid, &e),
        },
        ControlRequest::ResetConnection { session_id } => {
            let reset = manager.reset(&session_id).await;
            ControlResponse::ok(cid, json!({ "reset": reset }))
        }
        ControlRequest::DisconnectSession { session_id } => {
            if manager.disconnect(&session_id).await {
                ControlResponse::ok(cid, json!({ "disconnected": true }))
            } else {
                ControlResponse::err(
                    cid,
                    "disconnect_failed",
                    format!("could not log out session {session_id}"),
                )
            }
        }
        ControlRequest::DeleteSession { session_id } => {
            manager.delete(&session_id).await;
            match state.store.remove(&session_id).await {
                Ok(()) => ControlResponse::ok(cid, json!({ "deleted": true })),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "store delete failed");
                    error_response(cid, &e)
                }
            }
        }
        ControlRequest::CallSocketMethod {
            session_id,
            method,
            args,
        } => match manager.call_raw(&session_id, &method, &args).await {
            Ok(result) => ControlResponse::ok(cid, result),
            Err(e) => error_response(cid, &e),
        },
    }
}

async fn stored_credentials(state: &AppState, session_id: &str) -> Option<String> {
    match state.store.load_one(session_id).await {
        Ok(row) => row.and_then(|r| r.credentials),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "loading stored credentials failed");
            None
        }
    }
}

fn error_response(cid: Option<String>, e: &Error) -> ControlResponse {
    ControlResponse::err(cid, e.code(), e.to_string())
}

/// Wire form of a lifecycle event.
pub fn broadcast(event: SessionEvent) -> Broadcast {
    match event {
        SessionEvent::StatusChanged {
            session_id,
            owner_id,
            status,
            detail,
        } => Broadcast::ConnectionUpdate {
            session_id,
            owner_id,
            status: status.as_str().to_owned(),
            detail,
        },
        SessionEvent::QrGenerated {
            session_id,
            owner_id,
            qr,
        } => Broadcast::QrGenerated {
            session_id,
            owner_id,
            qr,
        },
        SessionEvent::MessageReceived {
            session_id,
            owner_id,
            payload,
            timestamp,
        } => Broadcast::MessageReceived {
            session_id,
            owner_id,
            payload,
            timestamp: DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
        },
        SessionEvent::Error {
            session_id,
            owner_id,
            error,
            code,
        } => Broadcast::Error {
            session_id,
            owner_id,
            error,
            code,
        },
    }
}
