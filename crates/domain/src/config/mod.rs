mod bridge;
mod media;
mod observability;
mod server;
mod sessions;
mod store;

pub use bridge::*;
pub use media::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "a zero request cap would reject every request",
            ));
        }

        let s = &self.sessions;
        if s.reconcile_interval_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.reconcile_interval_secs",
                "reconciliation interval must be greater than 0",
            ));
        }
        if s.max_retry_attempts == 0 {
            errors.push(ConfigError::error(
                "sessions.max_retry_attempts",
                "at least one retry attempt is required",
            ));
        } else if s.max_retry_attempts > 20 {
            errors.push(ConfigError::warning(
                "sessions.max_retry_attempts",
                "more than 20 attempts keeps dead sessions retrying for a long time",
            ));
        }
        if s.retry_base_delay_ms == 0 {
            errors.push(ConfigError::error(
                "sessions.retry_base_delay_ms",
                "base delay must be greater than 0",
            ));
        }
        if s.retry_base_delay_ms > s.retry_max_delay_ms {
            errors.push(ConfigError::error(
                "sessions.retry_max_delay_ms",
                "cap delay must be >= base delay",
            ));
        }
        if s.connect_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.connect_timeout_secs",
                "connect timeout must be greater than 0",
            ));
        }

        if self.store.path.as_os_str().is_empty() {
            errors.push(ConfigError::error("store.path", "store path must not be empty"));
        }

        if self.media.ffmpeg_path.is_empty() {
            errors.push(ConfigError::error(
                "media.ffmpeg_path",
                "ffmpeg path must not be empty",
            ));
        }
        if self.media.video_width % 2 != 0 || self.media.video_height % 2 != 0 {
            errors.push(ConfigError::error(
                "media.video_width",
                "video dimensions must be even for h264",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let issues = Config::default().validate();
        assert!(
            issues.iter().all(|i| i.severity != ConfigSeverity::Error),
            "unexpected errors: {issues:?}"
        );
    }

    #[test]
    fn inverted_backoff_is_an_error() {
        let mut cfg = Config::default();
        cfg.sessions.retry_base_delay_ms = 10_000;
        cfg.sessions.retry_max_delay_ms = 1_000;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "sessions.retry_max_delay_ms"
                && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn zero_attempts_is_an_error() {
        let mut cfg = Config::default();
        cfg.sessions.max_retry_attempts = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "sessions.max_retry_attempts"));
    }

    #[test]
    fn display_tags_severity() {
        let e = ConfigError::warning("a.b", "careful");
        assert_eq!(e.to_string(), "[WARN] a.b: careful");
    }
}
