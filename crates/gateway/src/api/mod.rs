pub mod auth;
pub mod health;
pub mod sessions;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no bearer token required) and
/// **protected** (gated behind the `LH_API_TOKEN` bearer-token middleware).
/// The bridge socket authenticates itself with its own pre-shared token.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/bridge/ws", get(crate::bridge::ws::bridge_ws));

    let protected = Router::new()
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/bridges", get(sessions::list_bridges))
        .route("/v1/control/ws", get(crate::control::ws::control_ws))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
