//! Admission control in front of the engine's worker pool.
//!
//! **Policy**: a fixed pool of slots sized to the engine's worker count,
//! fronted by a bounded FIFO wait queue. A request that finds the pool
//! exhausted joins the queue if there is room and waits up to the caller's
//! timeout; when the queue is full it is rejected at once. Nothing waits
//! unboundedly.
//!
//! **Release**: an `AdmissionSlot` returns its capacity when dropped, so
//! every exit path (error, timeout, panic, client disconnect) releases it
//! exactly once. Waiting is cancel-safe: dropping `acquire` before it
//! resolves leaves the queue without taking a slot.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::status_store::StatusStore;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Pool exhausted and the wait queue already full.
    QueueFull,
    /// Waited in the queue until the caller's timeout.
    WaitTimedOut,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "queue full"),
            Self::WaitTimedOut => write!(f, "wait timed out"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Engine capacity exceeded ({reason}): {in_flight}/{capacity} slots busy, {waiting} waiting")]
    CapacityExceeded {
        reason: RejectReason,
        capacity: usize,
        in_flight: usize,
        waiting: usize,
    },
    #[error("Admission gate is closed")]
    Closed,
}

/// Counters published to the status store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub queue_depth: usize,
    pub peak_in_flight: usize,
    pub admitted_total: u64,
    pub released_total: u64,
    pub rejected_total: u64,
}

struct GateShared {
    capacity: usize,
    queue_depth: usize,
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    admitted_total: AtomicU64,
    released_total: AtomicU64,
    rejected_total: AtomicU64,
    next_slot_id: AtomicU64,
    status: Arc<StatusStore>,
}

impl GateShared {
    fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            capacity: self.capacity,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            waiting: self.waiting.load(Ordering::SeqCst),
            queue_depth: self.queue_depth,
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            admitted_total: self.admitted_total.load(Ordering::SeqCst),
            released_total: self.released_total.load(Ordering::SeqCst),
            rejected_total: self.rejected_total.load(Ordering::SeqCst),
        }
    }

    fn publish(&self) {
        if let Err(e) = self.status.record_admission_with(|| self.stats()) {
            tracing::warn!(error = %e, "Could not publish admission stats");
        }
    }

    fn on_release(&self, slot_id: u64, held: Duration) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "admission slot {slot_id} released with no slot in flight");
        self.released_total.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            slot_id,
            held_ms = held.as_millis() as u64,
            in_flight = prev.saturating_sub(1),
            "Admission slot released"
        );
    }
}

// ═══════════════════════════════════════════════════════════
// AdmissionGate
// ═══════════════════════════════════════════════════════════

/// Bounded slot pool shared by every extraction request.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    shared: Arc<GateShared>,
}

impl AdmissionGate {
    pub fn new(capacity: usize, queue_depth: usize, status: Arc<StatusStore>) -> Self {
        let gate = Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            shared: Arc::new(GateShared {
                capacity,
                queue_depth,
                waiting: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                admitted_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
                rejected_total: AtomicU64::new(0),
                next_slot_id: AtomicU64::new(1),
                status,
            }),
        };
        gate.shared.publish();
        gate
    }

    /// Take a slot, waiting in FIFO order for at most `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<AdmissionSlot, AdmissionError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit)),
            Err(TryAcquireError::Closed) => return Err(AdmissionError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = self.enter_queue()?;
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.admit(permit)),
            Ok(Err(_)) => Err(AdmissionError::Closed),
            Err(_) => Err(self.reject(RejectReason::WaitTimedOut)),
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Result<AdmissionSlot, AdmissionError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.admit(permit)),
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed),
            Err(TryAcquireError::NoPermits) => Err(self.reject(RejectReason::QueueFull)),
        }
    }

    /// Stop admitting. Held slots stay valid; waiters fail with `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn waiting(&self) -> usize {
        self.shared.waiting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> AdmissionStats {
        self.shared.stats()
    }

    // ── Internal ────────────────────────────────────────────

    fn enter_queue(&self) -> Result<WaitGuard, AdmissionError> {
        let depth = self.shared.queue_depth;
        self.shared
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                (w < depth).then_some(w + 1)
            })
            .map_err(|_| self.reject(RejectReason::QueueFull))?;
        Ok(WaitGuard {
            shared: Arc::clone(&self.shared),
        })
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionSlot {
        let shared = &self.shared;
        let id = shared.next_slot_id.fetch_add(1, Ordering::SeqCst);
        let in_flight = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        shared.admitted_total.fetch_add(1, Ordering::SeqCst);
        shared.publish();
        tracing::debug!(slot_id = id, in_flight, capacity = shared.capacity, "Admission slot acquired");

        AdmissionSlot {
            id,
            permit: Some(permit),
            shared: Arc::clone(shared),
            acquired_at: Instant::now(),
        }
    }

    fn reject(&self, reason: RejectReason) -> AdmissionError {
        let shared = &self.shared;
        shared.rejected_total.fetch_add(1, Ordering::SeqCst);
        shared.publish();
        let err = AdmissionError::CapacityExceeded {
            reason,
            capacity: shared.capacity,
            in_flight: shared.in_flight.load(Ordering::SeqCst),
            waiting: shared.waiting.load(Ordering::SeqCst),
        };
        tracing::warn!(%reason, "Request rejected: {err}");
        err
    }
}

/// Occupies one place in the wait queue until dropped.
struct WaitGuard {
    shared: Arc<GateShared>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.shared.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

// ═══════════════════════════════════════════════════════════
// AdmissionSlot: RAII capacity token
// ═══════════════════════════════════════════════════════════

/// One unit of engine capacity, owned by a single request.
///
/// Released by `release()` or on drop, whichever comes first. `release`
/// consumes the slot, so a second release does not type-check.
pub struct AdmissionSlot {
    id: u64,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<GateShared>,
    acquired_at: Instant,
}

impl AdmissionSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(permit) = self.permit.take() {
            // Counters settle before the permit can be handed on
            self.shared.on_release(self.id, self.acquired_at.elapsed());
            drop(permit);
            self.shared.publish();
        }
    }
}

impl fmt::Debug for AdmissionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionSlot")
            .field("id", &self.id)
            .field("held", &self.permit.is_some())
            .finish()
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn gate(capacity: usize, queue_depth: usize) -> AdmissionGate {
        AdmissionGate::new(capacity, queue_depth, Arc::new(StatusStore::new()))
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn admits_up_to_capacity_then_rejects() {
        let gate = gate(4, 0);
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(gate.acquire(SHORT).await.unwrap());
        }
        assert_eq!(gate.in_flight(), 4);

        let err = gate.acquire(SHORT).await.unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::CapacityExceeded { reason: RejectReason::QueueFull, in_flight: 4, .. }
        ));

        held.pop().unwrap().release();
        let slot = gate.acquire(SHORT).await.unwrap();
        assert_eq!(gate.in_flight(), 4);
        drop(slot);
    }

    #[tokio::test]
    async fn queued_request_times_out_without_late_acquisition() {
        let gate = gate(1, 4);
        let held = gate.acquire(SHORT).await.unwrap();

        let err = gate.acquire(SHORT).await.unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::CapacityExceeded { reason: RejectReason::WaitTimedOut, .. }
        ));
        assert_eq!(gate.waiting(), 0);

        drop(held);
        // The timed-out waiter must not have taken the freed slot
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn queued_request_gets_slot_when_released() {
        let gate = gate(1, 1);
        let held = gate.acquire(SHORT).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(5)).await })
        };
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        drop(held);

        let slot = waiter.await.unwrap().unwrap();
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.waiting(), 0);
        drop(slot);
    }

    #[tokio::test]
    async fn queue_depth_is_bounded() {
        let gate = gate(1, 1);
        let _held = gate.acquire(SHORT).await.unwrap();

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(5)).await })
        };
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }

        let err = gate.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::CapacityExceeded { reason: RejectReason::QueueFull, .. }
        ));
        first.abort();
    }

    #[tokio::test]
    async fn slots_are_granted_in_arrival_order() {
        let gate = gate(1, 8);
        let held = gate.acquire(SHORT).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for label in ["a", "b", "c"] {
            let waiter_gate = gate.clone();
            let order = Arc::clone(&order);
            let queued_before = gate.waiting();
            tasks.push(tokio::spawn(async move {
                let slot = waiter_gate.acquire(Duration::from_secs(5)).await.unwrap();
                order.lock().unwrap().push(label);
                drop(slot);
            }));
            while gate.waiting() == queued_before {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn aborted_waiter_leaves_the_queue() {
        let gate = gate(1, 2);
        let held = gate.acquire(SHORT).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(30)).await })
        };
        while gate.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(gate.waiting(), 0);
        drop(held);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn slots_are_conserved_under_concurrency() {
        let gate = gate(3, 64);
        let mut tasks = Vec::new();
        for i in 0..40u64 {
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move {
                let slot = gate.acquire(Duration::from_secs(5)).await?;
                tokio::time::sleep(Duration::from_millis(i % 3)).await;
                if i % 2 == 0 {
                    slot.release();
                } else {
                    drop(slot);
                }
                Ok::<_, AdmissionError>(())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = gate.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.admitted_total, 40);
        assert_eq!(stats.admitted_total, stats.released_total);
        assert!(stats.peak_in_flight <= 3);
        assert_eq!(gate.available(), 3);
    }

    #[tokio::test]
    async fn slot_released_when_holder_panics() {
        let gate = gate(1, 0);
        let task = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _slot = gate.acquire(SHORT).await.unwrap();
                panic!("handler failed");
            })
        };
        assert!(task.await.is_err());
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn stats_reach_the_status_store() {
        let status = Arc::new(StatusStore::new());
        let gate = AdmissionGate::new(2, 0, Arc::clone(&status));

        let slot = gate.acquire(SHORT).await.unwrap();
        assert_eq!(status.snapshot().unwrap().admission.in_flight, 1);

        drop(slot);
        let admission = status.snapshot().unwrap().admission;
        assert_eq!(admission.in_flight, 0);
        assert_eq!(admission.released_total, 1);
    }

    #[tokio::test]
    async fn closed_gate_rejects() {
        let gate = gate(1, 1);
        gate.close();
        assert_eq!(gate.acquire(SHORT).await.unwrap_err(), AdmissionError::Closed);
    }

    #[test]
    fn try_acquire_does_not_wait() {
        let gate = gate(1, 4);
        let slot = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_err());
        drop(slot);
        assert!(gate.try_acquire().is_ok());
    }
}
