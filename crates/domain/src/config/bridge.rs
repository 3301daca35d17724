use serde::{Deserialize, Serialize};

/// Transport bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Timeout for a single request/response round trip to a bridge.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
    /// Seconds to wait for `bridge_hello` after the socket upgrades.
    #[serde(default = "d_hello_timeout")]
    pub hello_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: d_request_timeout(),
            hello_timeout_secs: d_hello_timeout(),
        }
    }
}

fn d_request_timeout() -> u64 {
    30
}
fn d_hello_timeout() -> u64 {
    10
}
