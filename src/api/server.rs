//! HTTP server lifecycle: bind, spawn, shut down.
//!
//! bind → spawn background task → return handle with shutdown channel.
//! Shutdown stops accepting connections and lets in-flight requests
//! finish; the caller bounds how long it waits with `stopped`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::router::frontdoor_router;
use crate::core_state::CoreState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Failed to read bound address: {0}")]
    LocalAddr(std::io::Error),
}

/// Metadata for a running server.
#[derive(Debug, Clone, Serialize)]
pub struct FrontdoorSession {
    pub session_id: String,
    pub server_addr: SocketAddr,
    pub started_at: String,
}

/// Handle to a running server.
pub struct FrontdoorServer {
    pub session: FrontdoorSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FrontdoorServer {
    pub fn addr(&self) -> SocketAddr {
        self.session.server_addr
    }

    /// Stop accepting new connections. In-flight requests keep running.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Server shutdown signal sent");
        }
    }

    /// Wait up to `grace` for the server task to finish. Returns whether
    /// it did; long-lived connections (event streams) can hold it open.
    pub async fn stopped(self, grace: Duration) -> bool {
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "Server did not drain in time");
                task.abort();
                false
            }
        }
    }
}

/// Bind `addr` and serve the front door router in a background task.
pub async fn start_server_on(
    core: Arc<CoreState>,
    addr: SocketAddr,
) -> Result<FrontdoorServer, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let app = frontdoor_router(core);

    let session = FrontdoorSession {
        session_id: Uuid::new_v4().to_string(),
        server_addr: addr,
        started_at: chrono::Utc::now().to_rfc3339(),
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("Server received shutdown signal");
        };

        tracing::info!(%addr, "Server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("Server error: {e}");
        }

        tracing::info!("Server stopped");
    });

    Ok(FrontdoorServer {
        session,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pdf_bytes, test_core};

    fn localhost() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn start_and_stop_server() {
        let (core, _engine) = test_core().await;
        let mut server = start_server_on(core, localhost()).await.expect("server should start");

        assert!(!server.session.session_id.is_empty());
        assert!(server.addr().port() > 0);

        let url = format!("http://{}/health", server.addr());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        server.shutdown();
        assert!(server.stopped(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let (core, _engine) = test_core().await;
        let mut first = start_server_on(Arc::clone(&core), localhost()).await.unwrap();

        let err = start_server_on(core, first.addr()).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));

        first.shutdown();
    }

    #[tokio::test]
    async fn extraction_over_http() {
        let (core, engine) = test_core().await;
        let mut server = start_server_on(Arc::clone(&core), localhost()).await.unwrap();

        let part = reqwest::multipart::Part::bytes(pdf_bytes().to_vec())
            .file_name("paper.pdf")
            .mime_str("application/pdf")
            .unwrap();
        let form = reqwest::multipart::Form::new().part("input", part);
        let resp = reqwest::Client::new()
            .post(format!("http://{}/api/processFulltextDocument", server.addr()))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("<TEI"));
        assert_eq!(engine.extraction_hits(), 1);

        server.shutdown();
        assert!(server.stopped(Duration::from_secs(2)).await);
        assert_eq!(core.gate().in_flight(), 0);
    }
}
