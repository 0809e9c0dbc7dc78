use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskReport, TaskResult};

/// Shortest period a recurring task may be scheduled with.
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(10 * 60);
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicPolicy {
    period: Duration,
    backoff_base: Duration,
}

impl Default for PeriodicPolicy {
    fn default() -> Self {
        Self { period: DEFAULT_PERIOD, backoff_base: DEFAULT_BACKOFF_BASE }
    }
}

impl PeriodicPolicy {
    pub fn new(period: Duration, backoff_base: Duration) -> Self {
        if period < MIN_PERIODIC_INTERVAL {
            warn!(
                requested_secs = period.as_secs(),
                "scheduler: period raised to the {} minute minimum",
                MIN_PERIODIC_INTERVAL.as_secs() / 60
            );
        }
        Self {
            period: period.max(MIN_PERIODIC_INTERVAL),
            backoff_base: backoff_base.max(Duration::from_secs(1)).min(MAX_BACKOFF),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Wait before the next run. A clean streak waits one period; the n-th
    /// failure in a row waits `backoff_base * 2^(n-1)`, capped at [`MAX_BACKOFF`].
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.period;
        }
        let exp = (consecutive_failures - 1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

pub async fn run_once(task: &dyn Task) -> TaskReport {
    let report = task.run().await;
    log_report(task.name(), &report);
    report
}

/// Runs `task` now and then on `policy` until `shutdown` turns true or its
/// sender goes away.
pub async fn run_periodic(
    task: Arc<dyn Task>,
    policy: PeriodicPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let report = run_once(task.as_ref()).await;
        failures = match report.result {
            TaskResult::Success => 0,
            TaskResult::Failure => failures.saturating_add(1),
        };

        let delay = policy.next_delay(failures);
        debug!(
            task = task.name(),
            failures,
            delay_secs = delay.as_secs(),
            "scheduler: next run scheduled"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
        }
    }
    info!(task = task.name(), "scheduler: periodic task stopped");
}

fn log_report(name: &'static str, report: &TaskReport) {
    match report.result {
        TaskResult::Success => info!(task = name, outcome = report.outcome, "scheduler: {}", report),
        TaskResult::Failure => warn!(task = name, outcome = report.outcome, "scheduler: {}", report),
    }
}
