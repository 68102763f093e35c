//! Test doubles shared by unit tests: an in-process engine, misbehaving
//! endpoints, and a scripted container runtime.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use bytes::Bytes;

use crate::config::AppConfig;
use crate::core_state::CoreState;
use crate::engine::Operation;
use crate::lifecycle::{ContainerRuntime, ContainerSet, ContainerState, RuntimeError};

pub const TEI_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader><fileDesc><titleStmt><title>A paper</title></titleStmt></fileDesc></teiHeader><text><body/></text></TEI>
"#;

/// Smallest byte string that passes the PDF signature check.
pub fn pdf_bytes() -> Bytes {
    Bytes::from_static(b"%PDF-1.4\n1 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n")
}

/// Configuration pointed at `engine_url`, with short timeouts and a small
/// slot pool.
pub fn test_config(engine_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.base_url = engine_url.trim_end_matches('/').to_string();
    config.engine.probe_timeout_ms = 500;
    config.engine.connect_timeout_ms = 500;
    config.engine.max_concurrency = 4;
    config.engine.retry.initial_backoff_ms = 10;
    config.engine.retry.max_backoff_ms = 50;
    config.admission.queue_depth = 4;
    config.admission.acquire_timeout_ms = 200;
    config.health.interval_secs = 1;
    config.health.probe_timeout_ms = 1_000;
    config.health.failure_threshold = 2;
    config.lifecycle.restart_settle_ms = 0;
    config.events.history_size = 50;
    config
}

/// Core wired to a fresh mock engine and a fake runtime. Keep the engine
/// alive for the duration of the test.
pub async fn test_core() -> (Arc<CoreState>, MockEngine) {
    let engine = MockEngine::start().await;
    let core = CoreState::with_runtime(test_config(&engine.url()), Arc::new(FakeRuntime::new()))
        .expect("test core");
    (Arc::new(core), engine)
}

// ═══════════════════════════════════════════════════════════
// MockEngine
// ═══════════════════════════════════════════════════════════

struct EngineBehaviour {
    alive: AtomicBool,
    delay: Mutex<Duration>,
    failure: Mutex<Option<u16>>,
    hits: AtomicUsize,
    last_fields: Mutex<Vec<(String, String)>>,
}

/// In-process engine answering the liveness, version and extraction routes.
pub struct MockEngine {
    url: String,
    behaviour: Arc<EngineBehaviour>,
}

impl MockEngine {
    pub async fn start() -> Self {
        let behaviour = Arc::new(EngineBehaviour {
            alive: AtomicBool::new(true),
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            hits: AtomicUsize::new(0),
            last_fields: Mutex::new(Vec::new()),
        });

        let mut app = Router::new()
            .route("/api/isalive", get(mock_is_alive))
            .route("/api/version", get(|| async { "0.8.1" }));
        for operation in Operation::ALL {
            app = app.route(operation.route(), post(mock_extract));
        }
        let app = app.with_state(Arc::clone(&behaviour));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            behaviour,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn set_alive(&self, alive: bool) {
        self.behaviour.alive.store(alive, Ordering::SeqCst);
    }

    /// Delay applied before every extraction answer.
    pub fn set_delay(&self, delay: Duration) {
        *self.behaviour.delay.lock().unwrap() = delay;
    }

    /// Answer extractions with this status instead of TEI.
    pub fn set_failure(&self, status: Option<u16>) {
        *self.behaviour.failure.lock().unwrap() = status;
    }

    pub fn extraction_hits(&self) -> usize {
        self.behaviour.hits.load(Ordering::SeqCst)
    }

    /// Text fields of the last extraction call. File parts are left out.
    pub fn last_fields(&self) -> Vec<(String, String)> {
        self.behaviour.last_fields.lock().unwrap().clone()
    }
}

async fn mock_is_alive(State(behaviour): State<Arc<EngineBehaviour>>) -> &'static str {
    if behaviour.alive.load(Ordering::SeqCst) {
        "true"
    } else {
        "false"
    }
}

async fn mock_extract(State(behaviour): State<Arc<EngineBehaviour>>, req: Request) -> Response {
    behaviour.hits.fetch_add(1, Ordering::SeqCst);

    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let mut fields = Vec::new();
    if is_multipart {
        let Ok(mut multipart) = Multipart::from_request(req, &()).await else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let is_file = field.file_name().is_some();
            let data = field.bytes().await.unwrap_or_default();
            if !is_file {
                fields.push((name, String::from_utf8_lossy(&data).into_owned()));
            }
        }
    } else {
        let Ok(Form(pairs)) = Form::<Vec<(String, String)>>::from_request(req, &()).await else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        fields = pairs;
    }
    *behaviour.last_fields.lock().unwrap() = fields;

    let delay = *behaviour.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let failure = *behaviour.failure.lock().unwrap();
    if let Some(code) = failure {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "engine overloaded").into_response();
    }

    ([(CONTENT_TYPE, "application/xml")], TEI_BODY).into_response()
}

// ═══════════════════════════════════════════════════════════
// Misbehaving endpoints
// ═══════════════════════════════════════════════════════════

/// URL of a port nothing listens on.
pub async fn refusing_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Accepts connections and closes them without answering.
pub struct DroppingEndpoint {
    url: String,
    accepts: Arc<AtomicUsize>,
}

impl DroppingEndpoint {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });
        Self {
            url: format!("http://{addr}"),
            accepts,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════
// FakeRuntime
// ═══════════════════════════════════════════════════════════

/// Scripted container runtime. Starts with one running `grobid-1`.
pub struct FakeRuntime {
    reachable: AtomicBool,
    fail_restart: AtomicBool,
    containers: Mutex<Vec<ContainerState>>,
    restart_delay: Duration,
    restarts: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            fail_restart: AtomicBool::new(false),
            containers: Mutex::new(vec![ContainerState {
                name: "grobid-1".into(),
                state: "running".into(),
                status: "Up 5 minutes".into(),
            }]),
            restart_delay: Duration::ZERO,
            restarts: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_containers(&self, containers: Vec<ContainerState>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> Result<(), RuntimeError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Unreachable("docker daemon not running".into()))
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, _set: &ContainerSet) -> Result<Vec<ContainerState>, RuntimeError> {
        self.ensure_reachable()?;
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn start(&self, _set: &ContainerSet) -> Result<(), RuntimeError> {
        self.ensure_reachable()?;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self, _set: &ContainerSet) -> Result<(), RuntimeError> {
        self.ensure_reachable()?;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart(&self, _set: &ContainerSet) -> Result<(), RuntimeError> {
        self.ensure_reachable()?;
        if !self.restart_delay.is_zero() {
            tokio::time::sleep(self.restart_delay).await;
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "docker compose up -d".into(),
                code: Some(1),
                stderr: "container exited during startup".into(),
            });
        }
        Ok(())
    }

    async fn logs(&self, container: &str, lines: u32) -> Result<String, RuntimeError> {
        self.ensure_reachable()?;
        Ok(format!("{container}: last {lines} lines\n"))
    }
}
