use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Skipped,
    Applied,
    Converged,
    TimedOut,
    VerificationFailed,
    HardFailure,
}

impl StepStatus {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::VerificationFailed | Self::HardFailure
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Skipped => "skipped",
            Self::Applied => "applied",
            Self::Converged => "converged",
            Self::TimedOut => "timed out",
            Self::VerificationFailed => "verification failed",
            Self::HardFailure => "hard failure",
        };
        f.write_str(label)
    }
}

/// Outcome of one pipeline step. Fields are read-only once the runner has
/// recorded the result.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    step_name: String,
    status: StepStatus,
    best_effort: bool,
    elapsed_ms: u64,
    diagnostics: Vec<String>,
}

impl StepResult {
    pub(crate) fn new(
        step_name: String,
        status: StepStatus,
        best_effort: bool,
        elapsed_ms: u64,
        diagnostics: Vec<String>,
    ) -> Self {
        Self {
            step_name,
            status,
            best_effort,
            elapsed_ms,
            diagnostics,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn best_effort(&self) -> bool {
        self.best_effort
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial success",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pipeline: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    steps: Vec<StepResult>,
    status: RunStatus,
    cancelled: bool,
}

impl RunReport {
    pub(crate) fn start(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            status: RunStatus::Success,
            cancelled: false,
        }
    }

    pub(crate) fn record(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Compute the overall status and close the report.
    pub(crate) fn finalize(mut self) -> Self {
        let hard_failed = self
            .steps
            .iter()
            .any(|s| s.status.is_failure() && !s.best_effort);
        let soft_failed = self.steps.iter().any(|s| s.status.is_failure());

        self.status = if hard_failed || self.cancelled {
            RunStatus::Failed
        } else if soft_failed {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}
