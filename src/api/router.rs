//! HTTP router for the extraction front door.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//!
//! Route groups:
//! 1. Extraction: body limit raised to the configured maximum
//! 2. Probes (`/health`, `/status`, `/api/isalive`, `/api/version`): `no-store`
//! 3. Operations (`/docker/*`, `/events*`)
//!
//! Access logging wraps all of them.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the front door router over shared state.
pub fn frontdoor_router(core: Arc<CoreState>) -> Router {
    let body_limit = core.config().body_limit_bytes;
    let ctx = ApiContext::new(core);

    let extraction = Router::new()
        .route(
            "/api/processFulltextDocument",
            post(endpoints::extraction::fulltext),
        )
        .route(
            "/api/processHeaderDocument",
            post(endpoints::extraction::header),
        )
        .route("/api/processReferences", post(endpoints::extraction::references))
        .route("/api/processCitation", post(endpoints::extraction::citation))
        .with_state(ctx.clone())
        .layer(DefaultBodyLimit::max(body_limit));

    let probes = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/status", get(endpoints::health::status))
        .route("/api/isalive", get(endpoints::engine::is_alive))
        .route("/api/version", get(endpoints::engine::version))
        .with_state(ctx.clone())
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    let ops = Router::new()
        .route("/docker/restart", post(endpoints::docker::restart))
        .route("/docker/logs", get(endpoints::docker::logs))
        .route("/events", get(endpoints::events::stream))
        .route("/events/history", get(endpoints::events::history))
        .with_state(ctx);

    Router::new()
        .merge(extraction)
        .merge(probes)
        .merge(ops)
        .layer(axum::middleware::from_fn(middleware::access::log_request))
}
