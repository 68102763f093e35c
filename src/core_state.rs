//! Shared application state.
//!
//! `CoreState` owns every long-lived component and is wrapped in `Arc` at
//! startup. Components get their collaborators (status store, event bus,
//! engine client) injected here; nothing is reached through a static.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::admission::AdmissionGate;
use crate::config::{AppConfig, ConfigError};
use crate::engine::{EngineClient, EngineError};
use crate::events::EventBus;
use crate::health::{EngineProbe, HealthAggregator, Probe, RuntimeProbe, StorageProbe};
use crate::lifecycle::{ContainerRuntime, DockerCli, LifecycleController};
use crate::status_store::StatusStore;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Cannot build engine client: {0}")]
    Engine(#[from] EngineError),
}

pub struct CoreState {
    config: Arc<AppConfig>,
    status: Arc<StatusStore>,
    events: Arc<EventBus>,
    gate: AdmissionGate,
    engine: Arc<EngineClient>,
    health: Arc<HealthAggregator>,
    lifecycle: LifecycleController,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl CoreState {
    /// Production wiring: lifecycle commands go through the docker CLI.
    pub fn new(config: AppConfig) -> Result<Self, CoreError> {
        let runtime = Arc::new(DockerCli::from_config(&config.lifecycle));
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(
        config: AppConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let config = Arc::new(config);

        let status = Arc::new(StatusStore::new());
        let events = Arc::new(EventBus::new(config.events.history_size));
        let gate = AdmissionGate::new(
            config.engine.max_concurrency,
            config.admission.queue_depth,
            Arc::clone(&status),
        );
        let engine = Arc::new(EngineClient::new(&config.engine)?);
        let lifecycle = LifecycleController::new(
            Arc::clone(&runtime),
            &config.lifecycle,
            Arc::clone(&status),
            Arc::clone(&events),
        );

        let probes: Vec<Box<dyn Probe>> = vec![
            Box::new(EngineProbe::new(
                Arc::clone(&engine),
                config.health.expected_version.clone(),
            )),
            Box::new(StorageProbe::new(config.health.storage_mount.clone())),
            Box::new(RuntimeProbe::new(runtime, lifecycle.targets().clone())),
        ];
        let health = Arc::new(HealthAggregator::new(
            probes,
            &config.health,
            Arc::clone(&status),
            Arc::clone(&events),
        ));

        Ok(Self {
            config,
            status,
            events,
            gate,
            engine,
            health,
            lifecycle,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
