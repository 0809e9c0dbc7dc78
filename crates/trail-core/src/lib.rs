//! Tracking supervision: turns raw fixes into stored records, keeps the
//! collection loop aligned with the durable tracking intent, and repairs it
//! after process death.

pub mod aggregator;
pub mod controller;
pub mod recovery;
pub mod scheduler;
pub mod task;
pub mod watchdog;

pub use aggregator::{Aggregator, RecordStream};
pub use controller::{
    LoopState, LoopStats, StartOutcome, StopOutcome, TrackingControl, TrackingController,
};
pub use recovery::{RecoveryOutcome, StartupRecovery};
pub use scheduler::PeriodicPolicy;
pub use task::{Task, TaskReport, TaskResult};
pub use watchdog::{HealthWatchdog, WatchdogOutcome};

use trail_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("failed to start location updates: {0}")]
    Start(String),
    #[error("intent store: {0}")]
    Intent(#[from] StoreError),
}
