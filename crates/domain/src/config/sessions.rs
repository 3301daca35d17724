use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tunables for the session lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How often the in-memory registry is reconciled against the store.
    #[serde(default = "d_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Consecutive transient failures tolerated before a session is
    /// abandoned and marked disconnected.
    #[serde(default = "d_max_attempts")]
    pub max_retry_attempts: u32,

    /// Delay before the first restart; doubled on every further attempt.
    #[serde(default = "d_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Ceiling for the restart delay.
    #[serde(default = "d_max_delay")]
    pub retry_max_delay_ms: u64,

    /// How long `start_connection` waits for the transport to settle
    /// (QR issued, opened or closed).
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Start every stored session when the gateway boots.
    #[serde(default = "d_true")]
    pub resume_on_boot: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: d_reconcile_interval(),
            max_retry_attempts: d_max_attempts(),
            retry_base_delay_ms: d_base_delay(),
            retry_max_delay_ms: d_max_delay(),
            connect_timeout_secs: d_connect_timeout(),
            resume_on_boot: true,
        }
    }
}

impl SessionsConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_reconcile_interval() -> u64 {
    300
}
fn d_max_attempts() -> u32 {
    5
}
fn d_base_delay() -> u64 {
    2_000
}
fn d_max_delay() -> u64 {
    60_000
}
fn d_connect_timeout() -> u64 {
    60
}
fn d_true() -> bool {
    true
}
