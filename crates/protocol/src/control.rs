//! Control-plane protocol: request/response by correlation id plus
//! unsolicited broadcasts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::OutboundContent;

/// A control request with its optional correlation id.
///
/// On the wire the id sits next to the request's `type` tag:
/// `{"type":"reset_connection","correlation_id":"c1","session_id":"42"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub request: ControlRequest,
}

/// Commands accepted from operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    StartConnection {
        session_id: String,
        display_name: String,
        owner_id: String,
        /// Previously persisted credential blob, if the caller holds one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<String>,
    },
    SendMessage {
        session_id: String,
        to: String,
        content: OutboundContent,
    },
    ResetConnection {
        session_id: String,
    },
    DisconnectSession {
        session_id: String,
    },
    DeleteSession {
        session_id: String,
    },
    CallSocketMethod {
        session_id: String,
        method: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

impl ControlRequest {
    pub fn session_id(&self) -> &str {
        match self {
            Self::StartConnection { session_id, .. }
            | Self::SendMessage { session_id, .. }
            | Self::ResetConnection { session_id }
            | Self::DisconnectSession { session_id }
            | Self::DeleteSession { session_id }
            | Self::CallSocketMethod { session_id, .. } => session_id,
        }
    }

    /// Wire name of the request type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartConnection { .. } => "start_connection",
            Self::SendMessage { .. } => "send_message",
            Self::ResetConnection { .. } => "reset_connection",
            Self::DisconnectSession { .. } => "disconnect_session",
            Self::DeleteSession { .. } => "delete_session",
            Self::CallSocketMethod { .. } => "call_socket_method",
        }
    }
}

/// Reply to a [`ControlEnvelope`].  Failures are always structured,
/// never a dropped socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ControlResponse {
    pub fn ok(correlation_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            kind: "response".into(),
            correlation_id,
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(
        correlation_id: Option<String>,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            kind: "response".into(),
            correlation_id,
            success: false,
            data: None,
            error: Some(error.into()),
            code: Some(code.into()),
        }
    }
}

/// Unsolicited events pushed to every control-plane client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Broadcast {
    ConnectionUpdate {
        session_id: String,
        owner_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    QrGenerated {
        session_id: String,
        owner_id: String,
        qr: String,
    },
    MessageReceived {
        session_id: String,
        owner_id: String,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Error {
        session_id: String,
        owner_id: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
    },
}
