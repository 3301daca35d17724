use std::sync::Arc;

use lh_domain::config::Config;
use lh_sessions::{CredentialStore, LifecycleManager};
use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeRegistry;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: LifecycleManager,
    pub store: Arc<dyn CredentialStore>,
    pub bridges: Arc<BridgeRegistry>,

    /// SHA-256 of the control-plane bearer token.  `None` in dev mode.
    pub api_token_hash: Option<Vec<u8>>,
    /// Pre-shared bridge token.  `None` in dev mode.
    pub bridge_token: Option<String>,

    /// Cancelled on shutdown; stops the reconciler.
    pub shutdown: CancellationToken,
}
