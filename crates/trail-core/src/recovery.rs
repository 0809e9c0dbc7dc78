use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use trail_store::IntentStore;

use crate::controller::TrackingControl;
use crate::task::{Task, TaskReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    NothingToRestore,
    RestoredOnStartup,
    StartupError(String),
}

impl RecoveryOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NothingToRestore => "no_tracking_to_restore",
            Self::RestoredOnStartup => "tracking_restored_on_startup",
            Self::StartupError(_) => "startup_error",
        }
    }
}

/// One-shot run at process start: if tracking was wanted when the previous
/// process died, start it again.
///
/// Never reports failure. A failed restore is left for the watchdog, which
/// sees intent still set and retries on its own schedule.
pub struct StartupRecovery {
    intents: Arc<dyn IntentStore>,
    control: Arc<dyn TrackingControl>,
}

impl StartupRecovery {
    pub fn new(intents: Arc<dyn IntentStore>, control: Arc<dyn TrackingControl>) -> Self {
        Self { intents, control }
    }

    pub async fn recover(&self) -> RecoveryOutcome {
        let wanted = match self.intents.intent() {
            Ok(v) => v,
            Err(e) => {
                warn!("recovery: could not read tracking intent: {}", e);
                return RecoveryOutcome::StartupError(e.to_string());
            }
        };
        if !wanted {
            info!("recovery: tracking was off, nothing to restore");
            return RecoveryOutcome::NothingToRestore;
        }

        match self.control.restart_if_intended().await {
            Ok(None) => RecoveryOutcome::NothingToRestore,
            Ok(Some(outcome)) => {
                info!(outcome = ?outcome, "recovery: tracking restored");
                RecoveryOutcome::RestoredOnStartup
            }
            Err(e) => {
                warn!("recovery: restore failed, leaving it to the watchdog: {}", e);
                RecoveryOutcome::StartupError(e.to_string())
            }
        }
    }
}

#[async_trait]
impl Task for StartupRecovery {
    fn name(&self) -> &'static str {
        "startup-recovery"
    }

    async fn run(&self) -> TaskReport {
        let outcome = self.recover().await;
        let report = TaskReport::success(outcome.code());
        match outcome {
            RecoveryOutcome::StartupError(msg) => report.with_detail(msg),
            _ => report,
        }
    }
}
