//! Access logging middleware.
//!
//! Tags every request with an `X-Request-Id` (the caller's, if it sent one)
//! and logs method, path, status and latency once the response head is ready.
//! Streamed bodies keep flowing after this point; their completion is
//! reported by the extraction relay.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::api::types::RequestId;

pub static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Probe paths polled by orchestrators; logged at debug to keep noise down.
fn is_probe(path: &str) -> bool {
    matches!(path, "/health" | "/status")
}

pub async fn log_request(mut req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if is_probe(&path) {
        tracing::debug!(%method, %path, status, latency_ms, request_id = %request_id, "Request");
    } else if response.status().is_server_error() {
        tracing::warn!(%method, %path, status, latency_ms, request_id = %request_id, "Request failed");
    } else {
        tracing::info!(%method, %path, status, latency_ms, request_id = %request_id, "Request");
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID.clone(), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn(log_request))
    }

    #[tokio::test]
    async fn assigns_request_id_when_missing() {
        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let response = app().oneshot(req).await.unwrap();

        let id = response.headers().get("x-request-id").unwrap();
        assert_eq!(id.to_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn echoes_caller_request_id() {
        let req = Request::builder()
            .uri("/ping")
            .header("X-Request-Id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(req).await.unwrap();

        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");
    }

    #[test]
    fn probe_paths_are_recognised() {
        assert!(is_probe("/health"));
        assert!(is_probe("/status"));
        assert!(!is_probe("/api/processFulltextDocument"));
    }
}
