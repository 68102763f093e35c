//! Container lifecycle for the engine: restart, start, stop, log tail.
//!
//! `runtime` talks to the container runtime (the docker CLI in production,
//! a fake in tests). `controller` serializes state-changing commands and
//! records each one in the status store.

pub mod controller;
pub mod runtime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use controller::{LifecycleController, LifecycleError, LogText, RestartAck};
pub use runtime::{ContainerRuntime, ContainerSet, ContainerState, DockerCli, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Restart,
    Start,
    Stop,
    Logs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOutcome {
    InProgress,
    Completed,
    Failed,
}

/// One issued lifecycle command and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRecord {
    pub command_id: Uuid,
    pub kind: LifecycleKind,
    pub targets: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub outcome: LifecycleOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LifecycleRecord {
    pub fn begin(kind: LifecycleKind, targets: Vec<String>) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            kind,
            targets,
            issued_at: Utc::now(),
            outcome: LifecycleOutcome::InProgress,
            finished_at: None,
            detail: None,
        }
    }

    pub fn finish(mut self, outcome: LifecycleOutcome, detail: Option<String>) -> Self {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
        self.detail = detail;
        self
    }
}
