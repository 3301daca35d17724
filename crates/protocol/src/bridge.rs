//! Transport bridge protocol.
//!
//! Flow:
//! 1. Bridge connects to `/v1/bridge/ws?token=<pre-shared-token>`
//! 2. Bridge sends `bridge_hello`; gateway answers `bridge_welcome`
//! 3. Gateway sends `open_session` and `request`; bridge streams
//!    `session_event` and answers each `request` with a `response`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Bridge → Gateway: initial handshake.
    BridgeHello {
        bridge_id: String,
        version: String,
        #[serde(default)]
        protocol_version: u32,
    },

    /// Gateway → Bridge: handshake accepted.
    BridgeWelcome {
        protocol_version: u32,
        gateway_version: String,
    },

    /// Gateway → Bridge: open a protocol connection with the given
    /// credential blob (versioned JSON, see `lh-sessions::credentials`).
    OpenSession {
        session_id: String,
        credentials: String,
    },

    /// Gateway → Bridge: invoke an operation on an open session.
    Request {
        request_id: String,
        session_id: String,
        op: String,
        #[serde(default)]
        args: serde_json::Value,
    },

    /// Bridge → Gateway: result of a `request`.
    Response {
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Bridge → Gateway: protocol event for one session, in emit order.
    SessionEvent {
        session_id: String,
        event: BridgeEvent,
    },

    Ping {
        timestamp: i64,
    },

    Pong {
        timestamp: i64,
    },
}

/// Protocol events a bridge reports for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeEvent {
    QrIssued {
        payload: String,
    },
    Opened {
        #[serde(default)]
        is_new_login: bool,
    },
    Closed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
        #[serde(default)]
        message: String,
    },
    /// `update` is a serialized credential update (changed identity and
    /// key-store writes).
    CredentialsChanged {
        update: serde_json::Value,
    },
    MessageReceived {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stub_code: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}
