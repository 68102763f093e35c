//! Container lifecycle endpoints.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::lifecycle::{LogText, RestartAck};

/// `POST /docker/restart`: 202 as soon as the restart is under way.
pub async fn restart(
    State(ctx): State<ApiContext>,
) -> Result<(StatusCode, Json<RestartAck>), ApiError> {
    let ack = ctx.core.lifecycle().restart().await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<u32>,
    pub container: Option<String>,
}

/// `GET /docker/logs?lines=N&container=NAME`
pub async fn logs(
    State(ctx): State<ApiContext>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<LogText>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let logs = ctx
        .core
        .lifecycle()
        .fetch_logs(query.container.as_deref(), query.lines)
        .await?;
    Ok(Json(logs))
}
