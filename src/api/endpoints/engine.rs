//! Engine liveness and version, relayed without taking a slot.

use axum::extract::State;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

/// `GET /api/isalive`: the engine's own answer, `true` or `false`.
pub async fn is_alive(State(ctx): State<ApiContext>) -> Result<String, ApiError> {
    let alive = ctx.core.engine().is_alive().await?;
    Ok(alive.to_string())
}

/// `GET /api/version`
pub async fn version(State(ctx): State<ApiContext>) -> Result<String, ApiError> {
    Ok(ctx.core.engine().version().await?)
}
