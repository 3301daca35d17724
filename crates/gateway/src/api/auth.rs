//! Bearer-token guard for the control plane.
//!
//! The token comes from the env var named by `server.api_token_env` and
//! is hashed once at boot (see [`digest`]).  With no token configured the
//! guard lets everything through and bootstrap has already warned.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// SHA-256 of a token, the form kept in [`AppState::api_token_hash`].
pub fn digest(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Compare the request's bearer token against `expected` in constant time.
/// Both sides are fixed-length digests so the token length does not leak.
fn authorized(expected: &[u8], headers: &HeaderMap) -> bool {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    bool::from(digest(provided).as_slice().ct_eq(expected))
}

/// Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_token_hash {
        if !authorized(expected, req.headers()) {
            tracing::debug!(path = %req.uri().path(), "rejected request with bad API token");
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({
                    "error": "invalid or missing API token",
                    "code": "unauthorized",
                })),
            )
                .into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn accepts_matching_bearer() {
        assert!(authorized(&digest("tok"), &headers("Bearer tok")));
    }

    #[test]
    fn rejects_wrong_scheme_and_missing_header() {
        let expected = digest("tok");
        assert!(!authorized(&expected, &headers("Basic tok")));
        assert!(!authorized(&expected, &headers("Bearer tok2")));
        assert!(!authorized(&expected, &HeaderMap::new()));
    }
}
