/// Shared error type used across all LinkHub crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session not connected: {0}")]
    NotConnected(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("transport (transient): {0}")]
    TransientTransport(String),

    #[error("transport (terminal): {0}")]
    TerminalTransport(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("media format: {0}")]
    MediaFormat(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code, echoed to control-plane clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotConnected(_) => "not_connected",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::TransientTransport(_) => "transient_transport_failure",
            Self::TerminalTransport(_) => "terminal_transport_failure",
            Self::Persistence(_) => "persistence_failure",
            Self::MediaFormat(_) => "media_format_failure",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config",
            Self::Other(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
