//! Process-wide status: health verdict, admission counters, engine traffic
//! and the last lifecycle action.
//!
//! One `RwLock` guards the whole snapshot, so readers always see a verdict
//! and its counters from the same moment. Writers are the health loop,
//! the admission gate, the proxy (engine outcomes) and the lifecycle
//! controller; each replaces only its own section.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::AdmissionStats;
use crate::health::{HealthVerdict, Verdict};
use crate::lifecycle::LifecycleRecord;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Internal lock error")]
    LockPoisoned,
}

/// Outcomes of real extraction calls, as opposed to probes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineTraffic {
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub last_failure: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub verdict: HealthVerdict,
    pub admission: AdmissionStats,
    pub engine_traffic: EngineTraffic,
    pub last_lifecycle: Option<LifecycleRecord>,
    pub updated_at: DateTime<Utc>,
}

pub struct StatusStore {
    inner: RwLock<StatusSnapshot>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StatusSnapshot {
                verdict: HealthVerdict::pending(),
                admission: AdmissionStats::default(),
                engine_traffic: EngineTraffic::default(),
                last_lifecycle: None,
                updated_at: Utc::now(),
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StatusSnapshot>, StatusError> {
        self.inner.read().map_err(|_| StatusError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StatusSnapshot>, StatusError> {
        self.inner.write().map_err(|_| StatusError::LockPoisoned)
    }

    /// Consistent copy of everything.
    pub fn snapshot(&self) -> Result<StatusSnapshot, StatusError> {
        Ok(self.read()?.clone())
    }

    pub fn verdict(&self) -> Result<HealthVerdict, StatusError> {
        Ok(self.read()?.verdict.clone())
    }

    /// Overall verdict. A poisoned store reads as `Unavailable`.
    pub fn overall(&self) -> Verdict {
        self.read()
            .map(|s| s.verdict.overall)
            .unwrap_or(Verdict::Unavailable)
    }

    pub fn publish_verdict(&self, verdict: HealthVerdict) -> Result<(), StatusError> {
        let mut guard = self.write()?;
        guard.verdict = verdict;
        guard.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the admission section with stats computed under the write
    /// lock, so the last writer always stores the newest counters.
    pub fn record_admission_with<F>(&self, stats: F) -> Result<(), StatusError>
    where
        F: FnOnce() -> AdmissionStats,
    {
        let mut guard = self.write()?;
        guard.admission = stats();
        guard.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_engine_success(&self) -> Result<(), StatusError> {
        let mut guard = self.write()?;
        let traffic = &mut guard.engine_traffic;
        traffic.total_successes += 1;
        traffic.consecutive_failures = 0;
        guard.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_engine_failure(&self, error: &str) -> Result<(), StatusError> {
        let mut guard = self.write()?;
        let now = Utc::now();
        let traffic = &mut guard.engine_traffic;
        traffic.total_failures += 1;
        traffic.consecutive_failures = traffic.consecutive_failures.saturating_add(1);
        traffic.last_failure = Some(error.to_string());
        traffic.last_failure_at = Some(now);
        guard.updated_at = now;
        Ok(())
    }

    pub fn record_lifecycle(&self, record: LifecycleRecord) -> Result<(), StatusError> {
        let mut guard = self.write()?;
        guard.last_lifecycle = Some(record);
        guard.updated_at = Utc::now();
        Ok(())
    }

    pub fn last_lifecycle(&self) -> Result<Option<LifecycleRecord>, StatusError> {
        Ok(self.read()?.last_lifecycle.clone())
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Component, ComponentHealth};
    use crate::lifecycle::{LifecycleKind, LifecycleOutcome};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn verdict_with(verdict: Verdict) -> HealthVerdict {
        let components: BTreeMap<_, _> = Component::ALL
            .into_iter()
            .map(|c| {
                (
                    c,
                    ComponentHealth {
                        verdict,
                        checked_at: Utc::now(),
                        consecutive_failures: 0,
                        detail: None,
                    },
                )
            })
            .collect();
        HealthVerdict::from_components(components)
    }

    #[test]
    fn starts_pending() {
        let store = StatusStore::new();
        assert_eq!(store.overall(), Verdict::Degraded);
        assert!(store.last_lifecycle().unwrap().is_none());
    }

    #[test]
    fn publish_replaces_verdict() {
        let store = StatusStore::new();
        store.publish_verdict(verdict_with(Verdict::Healthy)).unwrap();
        assert_eq!(store.overall(), Verdict::Healthy);
        assert_eq!(store.verdict().unwrap().components.len(), 3);
    }

    #[test]
    fn engine_failures_accumulate_until_success() {
        let store = StatusStore::new();
        store.record_engine_failure("timeout").unwrap();
        store.record_engine_failure("refused").unwrap();

        let traffic = store.snapshot().unwrap().engine_traffic;
        assert_eq!(traffic.consecutive_failures, 2);
        assert_eq!(traffic.last_failure.as_deref(), Some("refused"));

        store.record_engine_success().unwrap();
        let traffic = store.snapshot().unwrap().engine_traffic;
        assert_eq!(traffic.consecutive_failures, 0);
        assert_eq!(traffic.total_failures, 2);
        assert_eq!(traffic.total_successes, 1);
    }

    #[test]
    fn lifecycle_record_is_kept() {
        let store = StatusStore::new();
        let record = LifecycleRecord::begin(LifecycleKind::Restart, vec!["engine".into()]);
        let id = record.command_id;
        store.record_lifecycle(record.finish(LifecycleOutcome::Completed, None)).unwrap();

        let last = store.last_lifecycle().unwrap().unwrap();
        assert_eq!(last.command_id, id);
        assert_eq!(last.outcome, LifecycleOutcome::Completed);
    }

    #[test]
    fn readers_never_see_a_torn_verdict() {
        let store = Arc::new(StatusStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let v = if i % 2 == 0 { Verdict::Healthy } else { Verdict::Unavailable };
                    store.publish_verdict(verdict_with(v)).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let verdict = store.verdict().unwrap();
            let worst = verdict.components.values().map(|c| c.verdict).max().unwrap();
            assert_eq!(verdict.overall, worst);
        }
        writer.join().unwrap();
    }
}
