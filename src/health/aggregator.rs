//! Runs every probe, applies hysteresis and publishes the verdict.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;

use super::probes::Probe;
use super::verdict::{Component, ComponentHealth, ComponentTracker, HealthVerdict, ProbeOutcome, Verdict};
use crate::config::HealthConfig;
use crate::events::EventBus;
use crate::status_store::StatusStore;

struct TickState {
    trackers: BTreeMap<Component, ComponentTracker>,
    last_tick: Option<Instant>,
}

pub struct HealthAggregator {
    probes: Vec<Box<dyn Probe>>,
    /// Held for a whole tick, so ticks never interleave.
    state: tokio::sync::Mutex<TickState>,
    status: Arc<StatusStore>,
    events: Arc<EventBus>,
    probe_timeout: Duration,
    failure_threshold: u32,
}

impl HealthAggregator {
    pub fn new(
        probes: Vec<Box<dyn Probe>>,
        config: &HealthConfig,
        status: Arc<StatusStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let trackers = probes
            .iter()
            .map(|p| (p.component(), ComponentTracker::new(config.failure_threshold)))
            .collect();
        Self {
            probes,
            state: tokio::sync::Mutex::new(TickState {
                trackers,
                last_tick: None,
            }),
            status,
            events,
            probe_timeout: config.probe_timeout(),
            failure_threshold: config.failure_threshold,
        }
    }

    /// Probe everything once and publish the result.
    pub async fn tick(&self) -> HealthVerdict {
        let mut state = self.state.lock().await;
        self.tick_locked(&mut state).await
    }

    /// Tick only when the last one is older than `max_age`; otherwise
    /// return the published verdict.
    pub async fn refresh_if_stale(&self, max_age: Duration) -> HealthVerdict {
        let mut state = self.state.lock().await;
        let fresh = state.last_tick.is_some_and(|t| t.elapsed() < max_age);
        if fresh {
            if let Ok(verdict) = self.status.verdict() {
                return verdict;
            }
        }
        self.tick_locked(&mut state).await
    }

    async fn tick_locked(&self, state: &mut TickState) -> HealthVerdict {
        let timeout = self.probe_timeout;
        let outcomes = join_all(self.probes.iter().map(|probe| async move {
            let outcome = tokio::time::timeout(timeout, probe.check())
                .await
                .unwrap_or_else(|_| ProbeOutcome::Down(format!("probe timed out after {timeout:?}")));
            (probe.component(), outcome)
        }))
        .await;

        for (component, outcome) in outcomes {
            if let ProbeOutcome::Down(detail) = &outcome {
                tracing::debug!(%component, detail = %detail, "Health probe failed");
            }
            state
                .trackers
                .entry(component)
                .or_insert_with(|| ComponentTracker::new(self.failure_threshold))
                .record(outcome);
        }
        state.last_tick = Some(Instant::now());

        let mut components: BTreeMap<_, _> = state
            .trackers
            .iter()
            .map(|(c, t)| (*c, t.current().clone()))
            .collect();
        self.apply_engine_traffic(&mut components);

        let verdict = HealthVerdict::from_components(components);
        self.publish(&verdict);
        verdict
    }

    /// A run of failed extractions degrades the engine even while its
    /// liveness probe still answers.
    fn apply_engine_traffic(&self, components: &mut BTreeMap<Component, ComponentHealth>) {
        let Ok(snapshot) = self.status.snapshot() else {
            return;
        };
        let failures = snapshot.engine_traffic.consecutive_failures;
        if failures < self.failure_threshold {
            return;
        }
        if let Some(engine) = components.get_mut(&Component::EngineProcess) {
            if engine.verdict == Verdict::Healthy {
                engine.verdict = Verdict::Degraded;
                engine.detail = Some(format!("{failures} consecutive extraction failures"));
            }
        }
    }

    fn publish(&self, verdict: &HealthVerdict) {
        let previous = self.status.overall();
        if let Err(e) = self.status.publish_verdict(verdict.clone()) {
            tracing::error!(error = %e, "Could not publish health verdict");
            return;
        }
        if previous != verdict.overall {
            tracing::info!(
                previous = %previous,
                verdict = %verdict.overall,
                "Health verdict changed"
            );
            self.events.health_changed(previous, verdict.overall);
        }
    }
}
