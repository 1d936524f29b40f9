//! Bearer authentication middleware
//!
//! Tokens are 64 lowercase-hex characters validated against the external
//! key store; anything else fails closed before the store is consulted.
//! `require_auth` accepts any active key, `require_admin_auth` additionally
//! demands the admin role. A global config flag disables auth entirely.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::keystore::{ApiKey, Role};
use crate::AppState;

const MAX_TOKEN_LEN: usize = 100;
const TOKEN_LEN: usize = 64;

/// Extract and syntactically validate the bearer token.
///
/// Rejected outright: header injection bytes (CR/LF/HT), a missing or
/// non-`Bearer` scheme, tokens longer than 100 chars, and tokens that are
/// not exactly 64 hex chars.
pub fn validate_bearer(header_value: &str) -> Result<&str, AppError> {
    if header_value.contains(['\r', '\n']) {
        return Err(AppError::Unauthorized);
    }

    let mut parts = header_value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    // No trimming: a token that needs it is already malformed.
    let token = parts.next().unwrap_or("");
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    if token.len() > MAX_TOKEN_LEN {
        return Err(AppError::Unauthorized);
    }
    if token.contains(['\r', '\n', '\t']) {
        return Err(AppError::Unauthorized);
    }
    if token.len() != TOKEN_LEN || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::Unauthorized);
    }

    Ok(token)
}

async fn authenticate(state: &AppState, headers: &header::HeaderMap) -> Result<ApiKey, AppError> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = validate_bearer(header_value)?;

    let key = state.keystore.validate(token).await.map_err(|e| {
        warn!(error = %e, "authentication failed");
        AppError::Unauthorized
    })?;
    debug!(key_id = key.id, key_name = %key.name, "authenticated");
    Ok(key)
}

/// Require any active API key.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.auth.disabled {
        debug!("authentication disabled by configuration");
        return Ok(next.run(request).await);
    }

    let key = authenticate(&state, request.headers()).await?;
    request.extensions_mut().insert(key);
    Ok(next.run(request).await)
}

/// Require an active API key with the admin role.
pub async fn require_admin_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.auth.disabled {
        debug!("authentication disabled by configuration");
        return Ok(next.run(request).await);
    }

    let key = authenticate(&state, request.headers()).await?;
    if key.role != Role::Admin {
        warn!(key_id = key.id, "access denied: admin role required");
        return Err(AppError::AdminRequired);
    }
    request.extensions_mut().insert(key);
    Ok(next.run(request).await)
}
