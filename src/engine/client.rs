//! HTTP client for the extraction engine.
//!
//! Liveness and version checks are idempotent and retried with backoff
//! when the connection fails.
//! Extraction submissions are never retried: the engine may already have
//! done the work, and the caller's slot and deadline belong to one attempt.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};

use super::types::{ExtractionRequest, Payload};
use crate::config::EngineEndpointConfig;

/// Longest error body kept from a failed engine response.
const MAX_ERROR_BODY: usize = 2_048;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Cannot reach engine at {url}: {detail}")]
    Transport { url: String, detail: String },
    #[error("Engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected engine response: {0}")]
    MalformedResponse(String),
    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Connection refused, reset or dropped before a response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Worth another attempt for idempotent calls. Only transport failures
    /// qualify; a slow or erroring engine answers the same way twice.
    fn is_transient(&self) -> bool {
        self.is_transport()
    }
}

/// A successful engine answer whose body has not been read yet.
#[derive(Debug)]
pub struct EngineResponse {
    pub status: u16,
    pub content_type: Option<String>,
    response: reqwest::Response,
}

impl EngineResponse {
    /// Body as a stream of chunks. Read errors surface as `EngineError`.
    pub fn into_byte_stream(self) -> BoxStream<'static, Result<Bytes, EngineError>> {
        let url = self.response.url().to_string();
        self.response
            .bytes_stream()
            .map_err(move |e| classify(e, &url, Duration::ZERO))
            .boxed()
    }

    pub async fn text(self) -> Result<String, EngineError> {
        let url = self.response.url().to_string();
        self.response
            .text()
            .await
            .map_err(|e| classify(e, &url, Duration::ZERO))
    }
}

pub struct EngineClient {
    base_url: String,
    http: reqwest::Client,
    config: EngineEndpointConfig,
}

impl EngineClient {
    pub fn new(config: &EngineEndpointConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| EngineError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            config: config.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/isalive`. The engine answers the literal `true` or `false`.
    pub async fn is_alive(&self) -> Result<bool, EngineError> {
        let body = self.get_idempotent("/api/isalive").await?;
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(EngineError::MalformedResponse(format!(
                "isalive answered {other:?}"
            ))),
        }
    }

    /// `GET /api/version`, trimmed.
    pub async fn version(&self) -> Result<String, EngineError> {
        let body = self.get_idempotent("/api/version").await?;
        let version = body.trim();
        if version.is_empty() {
            return Err(EngineError::MalformedResponse("empty version".into()));
        }
        Ok(version.to_string())
    }

    /// Forward one extraction call. Single attempt.
    ///
    /// The effective timeout is the operation's budget, cut short by
    /// `deadline` when that comes first. It covers the response body too,
    /// so a stalled stream ends in `Timeout` rather than hanging.
    pub async fn submit(
        &self,
        request: &ExtractionRequest,
        deadline: Instant,
    ) -> Result<EngineResponse, EngineError> {
        let budget = self.config.timeout_for(request.operation);
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(budget);
        if timeout.is_zero() {
            return Err(EngineError::Timeout(budget));
        }

        let url = format!("{}{}", self.base_url, request.operation.route());
        let fields = request.options.form_fields(request.operation);
        let builder = self.http.post(&url).timeout(timeout);

        let builder = match &request.payload {
            Payload::Document {
                file_name,
                content_type,
                bytes,
            } => {
                let part = Part::stream_with_length(reqwest::Body::from(bytes.clone()), bytes.len() as u64)
                    .file_name(file_name.clone())
                    .mime_str(content_type.as_deref().unwrap_or("application/pdf"))
                    .map_err(|e| EngineError::HttpClient(e.to_string()))?;
                let form = fields
                    .into_iter()
                    .fold(Form::new().part("input", part), |form, (name, value)| {
                        form.text(name, value)
                    });
                builder.multipart(form)
            }
            Payload::Citations(text) => {
                let mut pairs: Vec<(&str, String)> = vec![("citations", text.clone())];
                pairs.extend(fields);
                builder.form(&pairs)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| classify(e, &url, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(EngineResponse {
            status: status.as_u16(),
            content_type,
            response,
        })
    }

    async fn get_idempotent(&self, path: &str) -> Result<String, EngineError> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            match self.get_once(path).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::debug!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Engine call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, path: &str) -> Result<String, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        let timeout = self.config.probe_timeout();

        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, &url, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify(e, &url, timeout))?;
        if !status.is_success() {
            return Err(EngineError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }
        Ok(body)
    }
}

fn classify(e: reqwest::Error, url: &str, timeout: Duration) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout(timeout)
    } else if e.is_connect() || e.is_request() || e.is_body() {
        EngineError::Transport {
            url: url.to_string(),
            detail: e.to_string(),
        }
    } else {
        EngineError::HttpClient(e.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
