//! HTTP router (temporary bisect version)
pub mod admin;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::get,
    Router,
};

use crate::middleware::auth;
use crate::AppState;

async fn dummy(State(_s): State<Arc<AppState>>) -> &'static str { "hi" }

pub fn create_router(state: Arc<AppState>) -> Router {
    let protected: Router<Arc<AppState>> = Router::new()
        .route("/openai-proxy/v1/models", get(dummy))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    protected.with_state(state)
}
