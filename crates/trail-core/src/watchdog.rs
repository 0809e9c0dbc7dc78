use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trail_store::IntentStore;

use crate::controller::TrackingControl;
use crate::task::{Task, TaskReport};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);
pub const MAX_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    NoActionNeeded,
    HealthCheckPassed,
    ServiceRestarted,
    FailedToRestart { reason: String },
    IntentUnavailable(String),
}

impl WatchdogOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActionNeeded => "no_action_needed",
            Self::HealthCheckPassed => "health_check_passed",
            Self::ServiceRestarted => "service_restarted",
            Self::FailedToRestart { .. } => "failed_to_restart_service",
            Self::IntentUnavailable(_) => "intent_unavailable",
        }
    }
}

/// Compares the durable intent with what is actually running and restarts
/// collection when they disagree. It reads intent but never writes it.
pub struct HealthWatchdog {
    intents: Arc<dyn IntentStore>,
    control: Arc<dyn TrackingControl>,
    grace: Duration,
}

impl HealthWatchdog {
    pub fn new(intents: Arc<dyn IntentStore>, control: Arc<dyn TrackingControl>) -> Self {
        Self { intents, control, grace: DEFAULT_GRACE }
    }

    /// Time given to a restarted loop before it is re-checked. Capped at
    /// [`MAX_GRACE`].
    pub fn with_grace(mut self, grace: Duration) -> Self {
        if grace > MAX_GRACE {
            warn!(
                requested_ms = grace.as_millis() as u64,
                "watchdog: grace period capped at {}s",
                MAX_GRACE.as_secs()
            );
        }
        self.grace = grace.min(MAX_GRACE);
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub async fn check(&self) -> WatchdogOutcome {
        let wanted = match self.intents.intent() {
            Ok(v) => v,
            Err(e) => {
                warn!("watchdog: tracking intent unreadable: {}", e);
                return WatchdogOutcome::IntentUnavailable(e.to_string());
            }
        };
        if !wanted {
            return WatchdogOutcome::NoActionNeeded;
        }
        if self.control.is_running() {
            return WatchdogOutcome::HealthCheckPassed;
        }

        warn!("watchdog: tracking should be active but is not, restarting");
        let start_err = match self.control.restart_if_intended().await {
            // a user stop landed after the read above
            Ok(None) => return WatchdogOutcome::NoActionNeeded,
            Ok(Some(_)) => None,
            Err(e) => {
                warn!("watchdog: restart attempt failed: {}", e);
                Some(e.to_string())
            }
        };

        tokio::time::sleep(self.grace).await;

        if self.control.is_running() {
            info!("watchdog: tracking restarted");
            WatchdogOutcome::ServiceRestarted
        } else {
            let reason = start_err.unwrap_or_else(|| {
                format!("not running {}ms after restart", self.grace.as_millis())
            });
            WatchdogOutcome::FailedToRestart { reason }
        }
    }
}

#[async_trait]
impl Task for HealthWatchdog {
    fn name(&self) -> &'static str {
        "health-watchdog"
    }

    async fn run(&self) -> TaskReport {
        let outcome = self.check().await;
        match outcome {
            WatchdogOutcome::FailedToRestart { reason } => {
                TaskReport::failure("failed_to_restart_service").with_detail(reason)
            }
            WatchdogOutcome::IntentUnavailable(msg) => {
                TaskReport::success("intent_unavailable").with_detail(msg)
            }
            other => TaskReport::success(other.code()),
        }
    }
}
