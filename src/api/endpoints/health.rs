//! Health and status endpoints. Neither touches the admission gate.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::AdmissionStats;
use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::health::{Component, ComponentHealth, Verdict};
use crate::lifecycle::LifecycleRecord;
use crate::status_store::EngineTraffic;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: Verdict,
    pub service: &'static str,
    pub version: &'static str,
}

/// `GET /health`: overall verdict only, from the last published state.
///
/// 200 while the service can take work (healthy or degraded), 503 once it
/// is unavailable.
pub async fn check(State(ctx): State<ApiContext>) -> Response {
    let verdict = ctx.core.status().overall();
    let code = match verdict {
        Verdict::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Verdict::Healthy | Verdict::Degraded => StatusCode::OK,
    };
    (
        code,
        Json(HealthResponse {
            status: verdict,
            service: crate::config::APP_NAME,
            version: crate::config::APP_VERSION,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: Verdict,
    pub components: BTreeMap<Component, ComponentHealth>,
    pub evaluated_at: DateTime<Utc>,
    pub in_flight: usize,
    pub admission: AdmissionStats,
    pub engine_traffic: EngineTraffic,
    pub last_lifecycle: Option<LifecycleRecord>,
    pub restart_in_progress: bool,
    pub event_subscribers: usize,
    pub engine_url: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub version: &'static str,
}

/// `GET /status`: full verdict detail plus admission counters.
///
/// Re-probes when the published verdict is older than the configured
/// max age.
pub async fn status(State(ctx): State<ApiContext>) -> Result<Json<StatusResponse>, ApiError> {
    let core = &ctx.core;
    core.health()
        .refresh_if_stale(core.config().health.status_max_age())
        .await;
    let snapshot = core.status().snapshot()?;

    Ok(Json(StatusResponse {
        status: snapshot.verdict.overall,
        components: snapshot.verdict.components,
        evaluated_at: snapshot.verdict.evaluated_at,
        in_flight: snapshot.admission.in_flight,
        admission: snapshot.admission,
        engine_traffic: snapshot.engine_traffic,
        last_lifecycle: snapshot.last_lifecycle,
        restart_in_progress: core.lifecycle().is_busy(),
        event_subscribers: core.events().subscriber_count(),
        engine_url: core.engine().base_url().to_string(),
        started_at: core.started_at(),
        uptime_secs: core.uptime_secs(),
        version: crate::config::APP_VERSION,
    }))
}
