//! Extraction endpoints: validate, admit, forward, stream back.
//!
//! Validation happens before admission, so malformed requests never take
//! a slot. Once admitted, the slot is owned either by this handler (until
//! the engine answers) or by the response body (while it streams).

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::Form;

use crate::api::error::ApiError;
use crate::api::stream::{ExtractionStream, RelayInfo};
use crate::api::types::{ApiContext, RequestId};
use crate::core_state::CoreState;
use crate::engine::{EngineError, ExtractionRequest, FormField, Operation};

/// `POST /api/processFulltextDocument`
pub async fn fulltext(State(ctx): State<ApiContext>, req: Request) -> Result<Response, ApiError> {
    extract(ctx.core, Operation::Fulltext, req).await
}

/// `POST /api/processHeaderDocument`
pub async fn header(State(ctx): State<ApiContext>, req: Request) -> Result<Response, ApiError> {
    extract(ctx.core, Operation::Header, req).await
}

/// `POST /api/processReferences`
pub async fn references(State(ctx): State<ApiContext>, req: Request) -> Result<Response, ApiError> {
    extract(ctx.core, Operation::References, req).await
}

/// `POST /api/processCitation`
pub async fn citation(State(ctx): State<ApiContext>, req: Request) -> Result<Response, ApiError> {
    extract(ctx.core, Operation::Citation, req).await
}

async fn extract(
    core: Arc<CoreState>,
    operation: Operation,
    req: Request,
) -> Result<Response, ApiError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let fields = read_form(req).await?;
    let request = ExtractionRequest::from_fields(operation, fields)?;

    let config = core.config();
    let slot = core.gate().acquire(config.admission.acquire_timeout()).await?;
    let started = Instant::now();
    let endpoint = operation.route();

    tracing::info!(
        %operation,
        request_id = %request_id,
        slot_id = slot.id(),
        file = request.label(),
        size = request.payload.len(),
        "Extraction admitted"
    );
    core.events()
        .extraction_start(request.label(), endpoint, request.payload.len());

    let deadline = started + config.engine.timeout_for(operation);
    let response = match core.engine().submit(&request, deadline).await {
        Ok(response) => response,
        Err(err) => {
            slot.release();
            record_failure(&core, &request, &err, started);
            return Err(err.into());
        }
    };

    let status = response.status;
    let content_type = response
        .content_type
        .clone()
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/xml"));

    let body = ExtractionStream::new(
        response.into_byte_stream(),
        slot,
        RelayInfo {
            core: Arc::clone(&core),
            operation,
            label: request.label().to_string(),
            engine_status: status,
            started,
        },
    );

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn record_failure(core: &CoreState, request: &ExtractionRequest, err: &EngineError, started: Instant) {
    let latency = started.elapsed();
    tracing::warn!(
        operation = %request.operation,
        latency_ms = latency.as_millis() as u64,
        error = %err,
        "Extraction failed"
    );
    let message = err.to_string();
    if let Err(e) = core.status().record_engine_failure(&message) {
        tracing::warn!(error = %e, "Could not record engine failure");
    }
    core.events()
        .extraction_failure(request.label(), request.operation.route(), &message, latency);
}

/// Collect the request's form fields, multipart or urlencoded.
async fn read_form(req: Request) -> Result<Vec<FormField>, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

        let mut fields = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Malformed multipart body: {}", e.body_text())))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::InvalidRequest(format!("Cannot read field '{name}': {}", e.body_text())))?;
            fields.push(FormField {
                name,
                file_name,
                content_type,
                data,
            });
        }
        return Ok(fields);
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, &())
            .await
            .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
        return Ok(pairs
            .into_iter()
            .map(|(name, value)| FormField::text(&name, &value))
            .collect());
    }

    Err(ApiError::InvalidRequest(
        "Expected multipart/form-data or application/x-www-form-urlencoded".into(),
    ))
}
