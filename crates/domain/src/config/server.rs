use serde::{Deserialize, Serialize};

/// HTTP listener, CORS and the two shared secrets.
///
/// Secrets never live in the file: `api_token_env` and
/// `bridge_token_env` name environment variables that are read once at
/// boot.  An unset or empty variable disables that check (dev mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Guards `/v1/sessions*`, `/v1/bridges` and `/v1/control/ws`
    /// (`Authorization: Bearer <token>`).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Bridges present this as `?token=` on `/v1/bridge/ws`.
    #[serde(default = "d_bridge_token_env")]
    pub bridge_token_env: String,
    /// In-flight HTTP request cap.  WebSocket upgrades count once each.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
            bridge_token_env: d_bridge_token_env(),
            max_concurrent_requests: d_max_concurrent(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Control-plane bearer token, if configured.
    pub fn api_token(&self) -> Option<String> {
        non_empty_env(&self.api_token_env)
    }

    /// Bridge pre-shared token, if configured.
    pub fn bridge_token(&self) -> Option<String> {
        non_empty_env(&self.bridge_token_env)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, `scheme://host:*` port wildcards, or a lone `"*"`.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3310
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_api_token_env() -> String {
    "LH_API_TOKEN".into()
}
fn d_bridge_token_env() -> String {
    "LH_BRIDGE_TOKEN".into()
}
fn d_max_concurrent() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3310");
        assert_eq!(cfg.api_token_env, "LH_API_TOKEN");
        assert_eq!(cfg.bridge_token_env, "LH_BRIDGE_TOKEN");
        assert_eq!(cfg.max_concurrent_requests, 256);
        assert_eq!(cfg.cors.allowed_origins.len(), 2);
    }

    #[test]
    fn token_env_names_are_configurable() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            host = "0.0.0.0"
            port = 8080
            bridge_token_env = "LH_TEST_UNSET_BRIDGE_TOKEN"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert!(cfg.bridge_token().is_none());
    }
}
