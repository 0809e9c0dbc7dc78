use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    /// The scheduler retries with backoff.
    Failure,
}

/// Result of one background task run. `outcome` is a stable code meant for
/// logs and diagnostics; `detail` carries any error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub result: TaskResult,
    pub outcome: &'static str,
    pub detail: Option<String>,
}

impl TaskReport {
    pub fn success(outcome: &'static str) -> Self {
        Self { result: TaskResult::Success, outcome, detail: None }
    }

    pub fn failure(outcome: &'static str) -> Self {
        Self { result: TaskResult::Failure, outcome, detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(d) => write!(f, "{} ({})", self.outcome, d),
            None => f.write_str(self.outcome),
        }
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self) -> TaskReport;
}
