//! Session model types shared by the manager and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of a session.
///
/// `Connecting → {QrPending ⇄ Connecting} → Connected`; any state may
/// fall to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Connecting,
    QrPending,
    Connected,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::QrPending => "QR_PENDING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for [`crate::LifecycleManager::start_connection`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub id: String,
    pub display_name: String,
    pub owner_id: String,
    /// Credential blob from an earlier run, if any.
    pub prior_credentials: Option<String>,
}

/// Result of a connection attempt, shared by every caller that joined it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub success: bool,
    pub message: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl StartOutcome {
    pub fn connected(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: SessionStatus::Connected,
            qr: None,
        }
    }

    pub fn qr_pending(payload: String) -> Self {
        Self {
            success: true,
            message: "scan the QR code to pair".into(),
            status: SessionStatus::QrPending,
            qr: Some(payload),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            status: SessionStatus::Disconnected,
            qr: None,
        }
    }
}

/// Read-only snapshot of a registered session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub display_name: String,
    pub owner_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    pub(crate) fn connecting(req: &StartRequest) -> Self {
        Self {
            id: req.id.clone(),
            display_name: req.display_name.clone(),
            owner_id: req.owner_id.clone(),
            status: SessionStatus::Connecting,
            qr: None,
            created_at: Utc::now(),
            connected_at: None,
        }
    }
}

/// What `send` reports back once the transport accepted a message.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Final mimetype after normalization (media only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    pub ptt: bool,
    /// Raw transport result.
    pub result: serde_json::Value,
}
