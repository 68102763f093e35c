//! One probe per component. Probes report raw outcomes; hysteresis lives in
//! the aggregator's trackers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::verdict::{Component, ProbeOutcome};
use crate::engine::EngineClient;
use crate::lifecycle::{ContainerRuntime, ContainerSet};

#[async_trait]
pub trait Probe: Send + Sync {
    fn component(&self) -> Component;
    async fn check(&self) -> ProbeOutcome;
}

// ── Engine ──────────────────────────────────────────────────

/// `isalive` plus a version sanity check.
pub struct EngineProbe {
    client: Arc<EngineClient>,
    expected_version: Option<String>,
}

impl EngineProbe {
    pub fn new(client: Arc<EngineClient>, expected_version: Option<String>) -> Self {
        Self {
            client,
            expected_version,
        }
    }
}

#[async_trait]
impl Probe for EngineProbe {
    fn component(&self) -> Component {
        Component::EngineProcess
    }

    async fn check(&self) -> ProbeOutcome {
        match self.client.is_alive().await {
            Ok(true) => {}
            Ok(false) => return ProbeOutcome::Impaired("engine reports not alive".into()),
            Err(e) => return ProbeOutcome::Down(e.to_string()),
        }

        match self.client.version().await {
            Ok(version) => match &self.expected_version {
                Some(expected) if !version.starts_with(expected.as_str()) => {
                    ProbeOutcome::Impaired(format!(
                        "engine version {version} does not match expected {expected}"
                    ))
                }
                _ => ProbeOutcome::Up,
            },
            Err(e) => ProbeOutcome::Impaired(format!("version check failed: {e}")),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────

/// Stat plus a small write/remove on the shared volume.
pub struct StorageProbe {
    mount: Option<PathBuf>,
}

impl StorageProbe {
    pub fn new(mount: Option<PathBuf>) -> Self {
        Self { mount }
    }
}

#[async_trait]
impl Probe for StorageProbe {
    fn component(&self) -> Component {
        Component::StorageMount
    }

    async fn check(&self) -> ProbeOutcome {
        let Some(mount) = &self.mount else {
            return ProbeOutcome::Up;
        };

        match tokio::fs::metadata(mount).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return ProbeOutcome::Down(format!("{} is not a directory", mount.display())),
            Err(e) => return ProbeOutcome::Down(format!("{}: {e}", mount.display())),
        }

        let marker = mount.join(format!(".frontdoor-probe-{}", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&marker, b"ok").await {
            return ProbeOutcome::Impaired(format!("{} is not writable: {e}", mount.display()));
        }
        if let Err(e) = tokio::fs::remove_file(&marker).await {
            tracing::warn!(path = %marker.display(), error = %e, "Could not remove probe file");
        }
        ProbeOutcome::Up
    }
}

// ── Container runtime ───────────────────────────────────────

/// Runtime reachable, and the engine containers running.
pub struct RuntimeProbe {
    runtime: Arc<dyn ContainerRuntime>,
    targets: ContainerSet,
}

impl RuntimeProbe {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, targets: ContainerSet) -> Self {
        Self { runtime, targets }
    }
}

#[async_trait]
impl Probe for RuntimeProbe {
    fn component(&self) -> Component {
        Component::LifecycleRuntime
    }

    async fn check(&self) -> ProbeOutcome {
        let containers = match self.runtime.list(&self.targets).await {
            Ok(containers) => containers,
            Err(e) => return ProbeOutcome::Down(e.to_string()),
        };
        if containers.is_empty() {
            return ProbeOutcome::Impaired(format!(
                "no containers labelled {}",
                self.targets.label
            ));
        }

        let stopped: Vec<&str> = containers
            .iter()
            .filter(|c| !c.is_running())
            .map(|c| c.name.as_str())
            .collect();
        if stopped.is_empty() {
            ProbeOutcome::Up
        } else {
            ProbeOutcome::Impaired(format!("not running: {}", stopped.join(", ")))
        }
    }
}
