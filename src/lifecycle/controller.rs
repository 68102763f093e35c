//! Serialized lifecycle commands against the engine's containers.
//!
//! One `tokio::sync::Mutex` guards every state-changing command. A restart
//! takes it with `try_lock`, so a second restart while one runs is refused
//! with `RestartInProgress` instead of queueing. The restart itself runs in
//! a background task that keeps holding the lock; the caller gets an
//! acknowledgment as soon as the runtime has been reached. Recovery of the
//! engine is left to the health loop.
//!
//! Log fetches never take the lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::runtime::{ContainerRuntime, ContainerSet, RuntimeError};
use super::{LifecycleKind, LifecycleOutcome, LifecycleRecord};
use crate::config::LifecycleConfig;
use crate::events::{EventBus, EventKind};
use crate::status_store::StatusStore;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Container runtime unavailable: {0}")]
    Unavailable(#[from] RuntimeError),
    #[error("A restart is already in progress")]
    RestartInProgress,
    #[error("{0}")]
    InvalidRequest(String),
}

/// Container name → log tail.
pub type LogText = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct RestartAck {
    pub command_id: Uuid,
    pub status: &'static str,
    pub issued_at: DateTime<Utc>,
    pub targets: Vec<String>,
}

pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    targets: ContainerSet,
    lock: Arc<tokio::sync::Mutex<()>>,
    status: Arc<StatusStore>,
    events: Arc<EventBus>,
    default_log_lines: u32,
    max_log_lines: u32,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: &LifecycleConfig,
        status: Arc<StatusStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            runtime,
            targets: ContainerSet::from_config(config),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            status,
            events,
            default_log_lines: config.default_log_lines,
            max_log_lines: config.max_log_lines,
            pending: Mutex::new(None),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn targets(&self) -> &ContainerSet {
        &self.targets
    }

    /// Whether a state-changing command currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Restart the container set in the background.
    ///
    /// Fails fast with `RestartInProgress` when another command holds the
    /// lock, and with `Unavailable` when the runtime cannot be queried.
    pub async fn restart(&self) -> Result<RestartAck, LifecycleError> {
        let guard = Arc::clone(&self.lock).try_lock_owned().map_err(|_| {
            tracing::info!("Restart refused: another lifecycle command is running");
            LifecycleError::RestartInProgress
        })?;

        let containers = self.runtime.list(&self.targets).await?;
        let targets = self.target_names(containers.into_iter().map(|c| c.name).collect());

        let record = LifecycleRecord::begin(LifecycleKind::Restart, targets.clone());
        self.record(record.clone());
        self.events.emit(
            EventKind::ContainerRestartStarted,
            json!({ "command_id": record.command_id, "targets": &targets }),
        );
        tracing::info!(command_id = %record.command_id, ?targets, "Container restart issued");

        let ack = RestartAck {
            command_id: record.command_id,
            status: "accepted",
            issued_at: record.issued_at,
            targets,
        };

        let task = tokio::spawn(run_restart(
            Arc::clone(&self.runtime),
            self.targets.clone(),
            Arc::clone(&self.status),
            Arc::clone(&self.events),
            record,
            guard,
        ));
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(task);
        }

        Ok(ack)
    }

    /// Bring the set up (`compose up -d`). Waits behind a running restart.
    pub async fn start(&self) -> Result<LifecycleRecord, LifecycleError> {
        self.run_exclusive(SetAction::Start).await
    }

    /// Take the set down (`compose down`). Waits behind a running restart.
    pub async fn stop(&self) -> Result<LifecycleRecord, LifecycleError> {
        self.run_exclusive(SetAction::Stop).await
    }

    /// Tail the logs of one container, or of every container in the set.
    pub async fn fetch_logs(
        &self,
        container: Option<&str>,
        lines: Option<u32>,
    ) -> Result<LogText, LifecycleError> {
        let lines = lines.unwrap_or(self.default_log_lines);
        if lines == 0 || lines > self.max_log_lines {
            return Err(LifecycleError::InvalidRequest(format!(
                "lines must be between 1 and {}",
                self.max_log_lines
            )));
        }

        let containers = self.runtime.list(&self.targets).await?;
        let names: Vec<String> = match container {
            Some(name) => {
                if !containers.iter().any(|c| c.name == name) {
                    return Err(LifecycleError::InvalidRequest(format!(
                        "unknown container '{name}'"
                    )));
                }
                vec![name.to_string()]
            }
            None => containers.into_iter().map(|c| c.name).collect(),
        };

        let mut logs = LogText::new();
        for name in names {
            let text = self.runtime.logs(&name, lines).await?;
            logs.insert(name, text);
        }
        Ok(logs)
    }

    /// Wait for a background restart to finish, if one was issued.
    pub async fn wait_for_pending(&self) {
        let task = self.pending.lock().ok().and_then(|mut p| p.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Restart task panicked");
            }
        }
    }

    // ── Internal ────────────────────────────────────────────

    async fn run_exclusive(&self, action: SetAction) -> Result<LifecycleRecord, LifecycleError> {
        let _guard = self.lock.lock().await;
        let kind = action.kind();
        let record = LifecycleRecord::begin(kind, vec![self.targets.label.clone()]);
        self.record(record.clone());

        let result = match action {
            SetAction::Start => self.runtime.start(&self.targets).await,
            SetAction::Stop => self.runtime.stop(&self.targets).await,
        };

        match result {
            Ok(()) => {
                let done = record.finish(LifecycleOutcome::Completed, None);
                tracing::info!(?kind, "Lifecycle command completed");
                self.record(done.clone());
                Ok(done)
            }
            Err(e) => {
                tracing::error!(?kind, error = %e, "Lifecycle command failed");
                self.record(record.finish(LifecycleOutcome::Failed, Some(e.to_string())));
                Err(e.into())
            }
        }
    }

    fn target_names(&self, names: Vec<String>) -> Vec<String> {
        if names.is_empty() {
            vec![self.targets.label.clone()]
        } else {
            names
        }
    }

    fn record(&self, record: LifecycleRecord) {
        if let Err(e) = self.status.record_lifecycle(record) {
            tracing::warn!(error = %e, "Could not record lifecycle action");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SetAction {
    Start,
    Stop,
}

impl SetAction {
    fn kind(self) -> LifecycleKind {
        match self {
            Self::Start => LifecycleKind::Start,
            Self::Stop => LifecycleKind::Stop,
        }
    }
}

async fn run_restart(
    runtime: Arc<dyn ContainerRuntime>,
    targets: ContainerSet,
    status: Arc<StatusStore>,
    events: Arc<EventBus>,
    record: LifecycleRecord,
    _guard: OwnedMutexGuard<()>,
) {
    let started = Instant::now();
    let command_id = record.command_id;

    let (finished, kind, data) = match runtime.restart(&targets).await {
        Ok(()) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(%command_id, duration_ms, "Container restart completed");
            (
                record.finish(LifecycleOutcome::Completed, None),
                EventKind::ContainerRestartCompleted,
                json!({ "command_id": command_id, "duration_ms": duration_ms }),
            )
        }
        Err(e) => {
            tracing::error!(%command_id, error = %e, "Container restart failed");
            let detail = e.to_string();
            (
                record.finish(LifecycleOutcome::Failed, Some(detail.clone())),
                EventKind::ContainerRestartFailed,
                json!({ "command_id": command_id, "error": detail }),
            )
        }
    };

    if let Err(e) = status.record_lifecycle(finished) {
        tracing::warn!(error = %e, "Could not record restart outcome");
    }
    events.emit(kind, data);
}
