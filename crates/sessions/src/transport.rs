//! Transport seam.
//!
//! A transport turns a credential state into a live protocol connection.
//! The manager never talks to the wire itself: it opens a
//! [`TransportConnection`] through a [`TransportConnector`], consumes the
//! connection's event stream in order, and issues operations through the
//! [`TransportHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use lh_domain::error::{Error, Result};
use lh_domain::media::NormalizedMedia;
use lh_protocol::content::OutboundContent;

use crate::credentials::{CredentialState, CredentialUpdate};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Something the transport reports about a session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing code the user must scan.
    QrIssued(String),
    /// The connection is authenticated and usable.
    Opened { is_new_login: bool },
    /// The connection ended.  Always the last event of a stream.
    Closed(CloseReason),
    /// Credential or key material changed and should be persisted.
    CredentialsChanged(CredentialUpdate),
    /// An inbound message.  Protocol stubs carry a `stub_code`.
    MessageReceived {
        payload: Option<Value>,
        stub_code: Option<u32>,
        timestamp: Option<i64>,
    },
}

/// Whether a close may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Transient,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: Option<u16>,
    pub message: String,
}

/// Close messages that mean the pairing window is gone for good.
const TERMINAL_MESSAGES: &[&str] = &["qr refs attempts ended", "pairing attempts exhausted"];

impl CloseReason {
    pub fn new(code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Authentication revoked (401/403) or pairing exhausted is terminal;
    /// everything else is worth another attempt.
    pub fn classify(&self) -> CloseKind {
        if matches!(self.code, Some(401) | Some(403)) {
            return CloseKind::Terminal;
        }
        let lower = self.message.to_ascii_lowercase();
        if TERMINAL_MESSAGES.iter().any(|m| lower.contains(m)) {
            return CloseKind::Terminal;
        }
        CloseKind::Transient
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector / handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An opened transport: the operation handle plus its ordered event stream.
pub struct TransportConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a connection for `session_id` using `credentials`.
    ///
    /// Failing here (as opposed to emitting `Closed` later) is treated as
    /// a transient failure by the restart path.
    async fn open(&self, session_id: &str, credentials: &CredentialState)
        -> Result<TransportConnection>;
}

#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send_message(&self, to: &str, message: OutboundMessage) -> Result<Value>;

    /// Revoke the pairing on the remote side.
    async fn logout(&self) -> Result<()>;

    /// Tear the connection down without revoking anything.  Idempotent.
    async fn end(&self);

    /// Run a read-only raw operation.
    async fn call(&self, op: &RawOperation) -> Result<Value>;
}

/// A message after media normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Media {
        media: NormalizedMedia,
        caption: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed set of transport methods operators may invoke by name.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOperation {
    OnWhatsApp { jids: Vec<String> },
    Logout,
    SendMessage { to: String, content: OutboundContent },
    GroupMetadata { jid: String },
    FetchStatus { jid: String },
    FetchBlocklist,
    ProfilePictureUrl { jid: String, kind: Option<String> },
    GetBusinessProfile { jid: String },
}

impl RawOperation {
    /// Names accepted by [`RawOperation::parse`].
    pub const METHODS: &'static [&'static str] = &[
        "onWhatsApp",
        "logout",
        "sendMessage",
        "groupMetadata",
        "fetchStatus",
        "fetchBlocklist",
        "profilePictureUrl",
        "getBusinessProfile",
    ];

    /// Build an operation from a method name and its arguments.
    ///
    /// `args` may be a positional array (`["123@s.whatsapp.net"]`) or an
    /// object with named fields (`{"jid": "123@s.whatsapp.net"}`).
    pub fn parse(method: &str, args: &Value) -> Result<Self> {
        let arg = Args { method, args };
        let op = match method {
            "onWhatsApp" => {
                let jids = match args {
                    Value::Array(items) => items
                        .iter()
                        .map(|v| as_string(method, "jids", v))
                        .collect::<Result<Vec<_>>>()?,
                    _ => {
                        let v = arg.named("jids")?;
                        match v {
                            Value::Array(items) => items
                                .iter()
                                .map(|v| as_string(method, "jids", v))
                                .collect::<Result<Vec<_>>>()?,
                            other => vec![as_string(method, "jids", other)?],
                        }
                    }
                };
                Self::OnWhatsApp { jids }
            }
            "logout" => Self::Logout,
            "sendMessage" => {
                let to = arg.string(0, "to")?;
                let raw = arg.get(1, "content")?;
                Self::SendMessage {
                    to,
                    content: parse_content(method, raw)?,
                }
            }
            "groupMetadata" => Self::GroupMetadata { jid: arg.string(0, "jid")? },
            "fetchStatus" => Self::FetchStatus { jid: arg.string(0, "jid")? },
            "fetchBlocklist" => Self::FetchBlocklist,
            "profilePictureUrl" => Self::ProfilePictureUrl {
                jid: arg.string(0, "jid")?,
                kind: arg.optional_string(1, "kind")?,
            },
            "getBusinessProfile" => Self::GetBusinessProfile { jid: arg.string(0, "jid")? },
            other => return Err(Error::MethodNotAllowed(other.to_owned())),
        };
        Ok(op)
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            Self::OnWhatsApp { .. } => "onWhatsApp",
            Self::Logout => "logout",
            Self::SendMessage { .. } => "sendMessage",
            Self::GroupMetadata { .. } => "groupMetadata",
            Self::FetchStatus { .. } => "fetchStatus",
            Self::FetchBlocklist => "fetchBlocklist",
            Self::ProfilePictureUrl { .. } => "profilePictureUrl",
            Self::GetBusinessProfile { .. } => "getBusinessProfile",
        }
    }

    /// Positional argument list as the transport expects it.
    pub fn args(&self) -> Value {
        match self {
            Self::OnWhatsApp { jids } => json!(jids),
            Self::Logout | Self::FetchBlocklist => json!([]),
            Self::SendMessage { to, content } => json!([to, content]),
            Self::GroupMetadata { jid }
            | Self::FetchStatus { jid }
            | Self::GetBusinessProfile { jid } => json!([jid]),
            Self::ProfilePictureUrl { jid, kind } => match kind {
                Some(kind) => json!([jid, kind]),
                None => json!([jid]),
            },
        }
    }
}

struct Args<'a> {
    method: &'a str,
    args: &'a Value,
}

impl<'a> Args<'a> {
    fn lookup(&self, index: usize, name: &str) -> Option<&'a Value> {
        let found = match self.args {
            Value::Array(items) => items.get(index),
            Value::Object(map) => map.get(name),
            Value::Null => None,
            // A bare scalar stands in for the first argument.
            scalar if index == 0 => Some(scalar),
            _ => None,
        };
        found.filter(|v| !v.is_null())
    }

    fn get(&self, index: usize, name: &str) -> Result<&'a Value> {
        self.lookup(index, name).ok_or_else(|| {
            Error::Other(format!("{}: missing argument '{name}'", self.method))
        })
    }

    fn named(&self, name: &str) -> Result<&'a Value> {
        self.get(0, name)
    }

    fn string(&self, index: usize, name: &str) -> Result<String> {
        as_string(self.method, name, self.get(index, name)?)
    }

    fn optional_string(&self, index: usize, name: &str) -> Result<Option<String>> {
        self.lookup(index, name)
            .map(|v| as_string(self.method, name, v))
            .transpose()
    }
}

fn as_string(method: &str, name: &str, v: &Value) -> Result<String> {
    v.as_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::Other(format!("{method}: argument '{name}' must be a string")))
}

/// Accept either a tagged [`OutboundContent`] or a bare `{"text": ".."}`.
fn parse_content(method: &str, raw: &Value) -> Result<OutboundContent> {
    if let Ok(content) = serde_json::from_value::<OutboundContent>(raw.clone()) {
        return Ok(content);
    }
    if let Some(text) = raw.get("text").and_then(Value::as_str) {
        return Ok(OutboundContent::Text { text: text.to_owned() });
    }
    if let Some(text) = raw.as_str() {
        return Ok(OutboundContent::Text { text: text.to_owned() });
    }
    Err(Error::Other(format!("{method}: unsupported message content")))
}
