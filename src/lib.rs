pub mod admission; // Bounded slot pool in front of the engine
pub mod api; // HTTP surface: router, handlers, server
pub mod config;
pub mod core_state;
pub mod engine; // Typed engine client
pub mod events;
pub mod health; // Probes, hysteresis, background loop
pub mod lifecycle; // Container restart/start/stop/logs
pub mod status_store;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, ConfigError};
use crate::core_state::{CoreError, CoreState};
use crate::lifecycle::LifecycleError;

/// How long in-flight requests may keep the server alive after a shutdown
/// signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Cannot start engine containers: {0}")]
    Containers(#[from] LifecycleError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
}

/// Run the front door until Ctrl-C or SIGTERM.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::from_env()?;
    tracing::info!(
        listen = %config.listen_addr,
        engine = %config.engine.base_url,
        capacity = config.engine.max_concurrency,
        queue_depth = config.admission.queue_depth,
        "Configuration loaded"
    );

    let core = Arc::new(CoreState::new(config)?);
    let manage_containers = core.config().lifecycle.manage_containers;

    if manage_containers {
        // Containers only; the health loop reports when the engine is ready.
        core.lifecycle().start().await?;
    }

    let health_loop = health::start_health_loop(
        Arc::clone(core.health()),
        core.config().health.interval(),
    );
    let mut server = api::start_server_on(Arc::clone(&core), core.config().listen_addr).await?;
    tracing::info!(addr = %server.addr(), "Front door ready");

    shutdown_signal().await;
    tracing::info!("Shutting down");

    server.shutdown();
    core.gate().close();
    server.stopped(SHUTDOWN_GRACE).await;
    health_loop.stop().await;
    core.lifecycle().wait_for_pending().await;

    if manage_containers {
        if let Err(e) = core.lifecycle().stop().await {
            tracing::error!(error = %e, "Could not stop engine containers");
        }
    }

    tracing::info!(
        admitted = core.gate().stats().admitted_total,
        uptime_secs = core.uptime_secs(),
        "Stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
