//! Health classification and the per-component hysteresis tracker.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ordered so that `max` picks the worse verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    Degraded,
    Unavailable,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    EngineProcess,
    StorageMount,
    LifecycleRuntime,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::EngineProcess,
        Component::StorageMount,
        Component::LifecycleRuntime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EngineProcess => "engine-process",
            Self::StorageMount => "storage-mount",
            Self::LifecycleRuntime => "lifecycle-runtime",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub verdict: Verdict,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Overall verdict plus every component's own verdict.
///
/// Built only through `from_components`, so `overall` is always the worst
/// component verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    pub overall: Verdict,
    pub components: BTreeMap<Component, ComponentHealth>,
    pub evaluated_at: DateTime<Utc>,
}

impl HealthVerdict {
    pub fn from_components(components: BTreeMap<Component, ComponentHealth>) -> Self {
        let overall = components
            .values()
            .map(|c| c.verdict)
            .max()
            .unwrap_or(Verdict::Unavailable);
        Self {
            overall,
            components,
            evaluated_at: Utc::now(),
        }
    }

    /// State before the first probe round has completed.
    pub fn pending() -> Self {
        let now = Utc::now();
        let components = Component::ALL
            .into_iter()
            .map(|c| {
                (
                    c,
                    ComponentHealth {
                        verdict: Verdict::Degraded,
                        checked_at: now,
                        consecutive_failures: 0,
                        detail: Some("awaiting first probe".into()),
                    },
                )
            })
            .collect();
        Self::from_components(components)
    }

    pub fn component(&self, component: Component) -> Option<&ComponentHealth> {
        self.components.get(&component)
    }
}

/// Result of one probe, before hysteresis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Reachable and sane.
    Up,
    /// Reachable but not fully serviceable (engine not ready, read-only
    /// mount, no running containers).
    Impaired(String),
    /// Could not be reached at all.
    Down(String),
}

/// Hysteresis for one component.
///
/// `Down` outcomes only count toward the threshold; the verdict drops to
/// `Unavailable` once `threshold` of them arrive in a row. Any `Up` or
/// `Impaired` outcome resets the streak.
#[derive(Debug, Clone)]
pub struct ComponentTracker {
    threshold: u32,
    state: ComponentHealth,
}

impl ComponentTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: ComponentHealth {
                verdict: Verdict::Degraded,
                checked_at: Utc::now(),
                consecutive_failures: 0,
                detail: Some("awaiting first probe".into()),
            },
        }
    }

    pub fn record(&mut self, outcome: ProbeOutcome) -> &ComponentHealth {
        let now = Utc::now();
        match outcome {
            ProbeOutcome::Up => {
                self.state.verdict = Verdict::Healthy;
                self.state.consecutive_failures = 0;
                self.state.detail = None;
            }
            ProbeOutcome::Impaired(detail) => {
                self.state.verdict = Verdict::Degraded;
                self.state.consecutive_failures = 0;
                self.state.detail = Some(detail);
            }
            ProbeOutcome::Down(detail) => {
                self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
                if self.state.consecutive_failures >= self.threshold {
                    self.state.verdict = Verdict::Unavailable;
                }
                self.state.detail = Some(detail);
            }
        }
        self.state.checked_at = now;
        &self.state
    }

    pub fn current(&self) -> &ComponentHealth {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down() -> ProbeOutcome {
        ProbeOutcome::Down("connection refused".into())
    }

    #[test]
    fn verdicts_order_by_severity() {
        assert!(Verdict::Healthy < Verdict::Degraded);
        assert!(Verdict::Degraded < Verdict::Unavailable);
    }

    #[test]
    fn overall_is_worst_component() {
        let mut tracker_ok = ComponentTracker::new(3);
        let mut tracker_bad = ComponentTracker::new(1);
        let mut components = BTreeMap::new();
        components.insert(Component::EngineProcess, tracker_ok.record(ProbeOutcome::Up).clone());
        components.insert(Component::StorageMount, tracker_bad.record(down()).clone());

        let verdict = HealthVerdict::from_components(components);
        assert_eq!(verdict.overall, Verdict::Unavailable);
    }

    #[test]
    fn pending_verdict_is_degraded() {
        let verdict = HealthVerdict::pending();
        assert_eq!(verdict.overall, Verdict::Degraded);
        assert_eq!(verdict.components.len(), 3);
    }

    #[test]
    fn two_failures_then_success_never_downgrade() {
        let mut tracker = ComponentTracker::new(3);
        tracker.record(ProbeOutcome::Up);

        assert_eq!(tracker.record(down()).verdict, Verdict::Healthy);
        assert_eq!(tracker.record(down()).verdict, Verdict::Healthy);
        assert_eq!(tracker.record(ProbeOutcome::Up).verdict, Verdict::Healthy);
        assert_eq!(tracker.current().consecutive_failures, 0);
    }

    #[test]
    fn three_failures_downgrade_and_one_success_clears() {
        let mut tracker = ComponentTracker::new(3);
        tracker.record(ProbeOutcome::Up);

        tracker.record(down());
        tracker.record(down());
        let state = tracker.record(down());
        assert_eq!(state.verdict, Verdict::Unavailable);
        assert_eq!(state.consecutive_failures, 3);

        assert_eq!(tracker.record(ProbeOutcome::Up).verdict, Verdict::Healthy);
    }

    #[test]
    fn impaired_is_degraded_and_resets_streak() {
        let mut tracker = ComponentTracker::new(2);
        tracker.record(down());
        let state = tracker.record(ProbeOutcome::Impaired("not ready".into()));
        assert_eq!(state.verdict, Verdict::Degraded);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.detail.as_deref(), Some("not ready"));
    }

    #[test]
    fn component_names_are_kebab_case() {
        let json = serde_json::to_value(Component::LifecycleRuntime).unwrap();
        assert_eq!(json, "lifecycle-runtime");
        assert_eq!(Component::EngineProcess.to_string(), "engine-process");
    }
}
