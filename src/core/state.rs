//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step succeeded or was allowed to fail
    Succeeded,
    /// A fatal step failure aborted the run
    Failed,
    /// The trigger condition was not met; nothing ran
    Skipped,
    /// The run was cancelled from outside
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Skipped => "Skipped",
            ExecutionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(ExecutionStatus::Pending),
            "Running" => Some(ExecutionStatus::Running),
            "Succeeded" => Some(ExecutionStatus::Succeeded),
            "Failed" => Some(ExecutionStatus::Failed),
            "Skipped" => Some(ExecutionStatus::Skipped),
            "Cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Why a step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The process exited with a non-zero code (-1 when killed by a signal)
    ExitCode { code: i32 },
    /// The step ran longer than its timeout
    TimedOut { secs: u64 },
    /// The step could not run or a managed action reported an error
    Error { message: String },
}

impl FailureKind {
    /// Exit code to surface for this failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            FailureKind::ExitCode { code } => Some(*code),
            _ => None,
        }
    }

    /// Timeout failure, rounding partial seconds up so it never reads as 0
    pub fn timed_out(duration: Duration) -> Self {
        FailureKind::TimedOut {
            secs: whole_secs_ceil(duration),
        }
    }
}

fn whole_secs_ceil(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ExitCode { code } => write!(f, "exit code {}", code),
            FailureKind::TimedOut { secs } => write!(f, "timed out after {} seconds", secs),
            FailureKind::Error { message } => write!(f, "{}", message),
        }
    }
}

/// The first fatal failure of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("step '{step_id}' failed: {kind}")]
pub struct RunFailure {
    pub step_id: String,
    pub kind: FailureKind,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(RunFailure),
    Skipped { reason: String },
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            RunOutcome::Succeeded => ExecutionStatus::Succeeded,
            RunOutcome::Failed(_) => ExecutionStatus::Failed,
            RunOutcome::Skipped { .. } => ExecutionStatus::Skipped,
            RunOutcome::Cancelled => ExecutionStatus::Cancelled,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Succeeded or skipped; neither should fail a CI check
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded | RunOutcome::Skipped { .. })
    }
}

/// State of a single step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not been reached yet
    Pending,
    /// Step is currently running
    Running { started_at: DateTime<Utc> },
    /// Step completed with a zero exit status
    Succeeded {
        log: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed; `tolerated` is set when its policy let the run continue
    Failed {
        failure: FailureKind,
        log: String,
        tolerated: bool,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step was not run
    Skipped { reason: String },
    /// Step was cancelled; `interrupted` is set when it was running at the time
    Cancelled { log: String, interrupted: bool },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepState::Pending | StepState::Running { .. })
    }

    /// Whether the step actually executed (successfully or not)
    pub fn was_executed(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded { .. }
                | StepState::Failed { .. }
                | StepState::Cancelled { interrupted: true, .. }
        )
    }

    /// Captured output, if the step produced any
    pub fn log(&self) -> Option<&str> {
        match self {
            StepState::Succeeded { log, .. }
            | StepState::Failed { log, .. }
            | StepState::Cancelled { log, .. } => Some(log),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running { .. } => "running",
            StepState::Succeeded { .. } => "succeeded",
            StepState::Failed { tolerated: true, .. } => "failed (tolerated)",
            StepState::Failed { .. } => "failed",
            StepState::Skipped { .. } => "skipped",
            StepState::Cancelled { .. } => "cancelled",
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of steps
    pub total_steps: usize,

    /// Number of steps that succeeded
    pub succeeded_steps: usize,

    /// Number of steps that failed, tolerated or not
    pub failed_steps: usize,

    /// Number of steps that were skipped or cancelled before running
    pub skipped_steps: usize,

    /// First fatal failure, if any
    pub failure: Option<RunFailure>,

    /// Why the run was skipped, if it was
    pub skip_reason: Option<String>,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            succeeded_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
            failure: None,
            skip_reason: None,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_steps: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    pub fn succeed(&mut self) {
        self.finish(ExecutionStatus::Succeeded);
    }

    /// Record the first fatal failure. Later failures do not replace it.
    pub fn fail(&mut self, failure: RunFailure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        self.finish(ExecutionStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(ExecutionStatus::Cancelled);
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip_reason = Some(reason.into());
        self.finish(ExecutionStatus::Skipped);
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
    }

    /// Update step counts based on current steps
    pub fn update_counts<'a>(&mut self, states: impl Iterator<Item = &'a StepState>) {
        let (mut succeeded, mut failed, mut skipped) = (0, 0, 0);
        for state in states {
            match state {
                StepState::Succeeded { .. } => succeeded += 1,
                StepState::Failed { .. } => failed += 1,
                StepState::Skipped { .. } | StepState::Cancelled { .. } => skipped += 1,
                _ => {}
            }
        }
        self.succeeded_steps = succeeded;
        self.failed_steps = failed;
        self.skipped_steps = skipped;
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.succeeded_steps + self.failed_steps + self.skipped_steps) as f64
            / self.total_steps as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
