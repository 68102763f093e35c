//! Health aggregation across the engine, the shared storage mount and the
//! container runtime.

pub mod aggregator;
pub mod background;
pub mod probes;
pub mod verdict;

pub use aggregator::HealthAggregator;
pub use background::{start_health_loop, HealthLoopHandle};
pub use probes::{EngineProbe, Probe, RuntimeProbe, StorageProbe};
pub use verdict::{Component, ComponentHealth, ComponentTracker, HealthVerdict, ProbeOutcome, Verdict};
