//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use lh_domain::config::{Config, ConfigSeverity};
use lh_media::MediaNormalizer;
use lh_sessions::{CredentialStore, JsonFileStore, LifecycleManager};

use crate::bridge::{BridgeConnector, BridgeRegistry};
use crate::state::AppState;

/// Validate config, open the credential store and wire the lifecycle
/// manager to the bridge transport.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Credential store ─────────────────────────────────────────────
    let store: Arc<dyn CredentialStore> = Arc::new(
        JsonFileStore::open(config.store.path.clone())
            .await
            .with_context(|| format!("opening session store {}", config.store.path.display()))?,
    );
    tracing::info!(path = %config.store.path.display(), "session store ready");

    // ── Bridges & media ──────────────────────────────────────────────
    let bridges = Arc::new(BridgeRegistry::new(Duration::from_secs(
        config.bridge.request_timeout_secs,
    )));
    let connector = Arc::new(BridgeConnector::new(bridges.clone()));
    let media = Arc::new(MediaNormalizer::from_config(config.media.clone()));
    tracing::info!(ffmpeg = %config.media.ffmpeg_path, "media pipeline ready");

    let manager = LifecycleManager::new(connector, store.clone(), media, &config.sessions);

    // ── Tokens (read once) ───────────────────────────────────────────
    let api_token_hash = match config.server.api_token() {
        Some(t) => {
            tracing::info!(env = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(crate::api::auth::digest(&t))
        }
        None => {
            tracing::warn!(
                "API bearer-token auth DISABLED, set the {} env var",
                config.server.api_token_env
            );
            None
        }
    };
    let bridge_token = config.server.bridge_token();
    if bridge_token.is_none() {
        tracing::warn!(
            "bridge auth DISABLED, any client may register as a bridge; set the {} env var",
            config.server.bridge_token_env
        );
    }

    Ok(AppState {
        config,
        manager,
        store,
        bridges,
        api_token_hash,
        bridge_token,
        shutdown: CancellationToken::new(),
    })
}

/// Spawn the reconciliation loop and, when enabled, resume every stored
/// session.
///
/// Resuming runs in the background: sessions settle as bridges connect
/// and failed resumes fall into the normal restart path.
pub fn spawn_background_tasks(state: &AppState) {
    let sessions = &state.config.sessions;
    let _reconciler = state
        .manager
        .run_reconciler(sessions.reconcile_interval(), state.shutdown.child_token());

    if sessions.resume_on_boot {
        let manager = state.manager.clone();
        tokio::spawn(async move {
            match manager.resume_all().await {
                Ok(n) => tracing::info!(resumed = n, "stored sessions resumed"),
                Err(e) => tracing::warn!(error = %e, "resuming stored sessions failed"),
            }
        });
    }
}
