//! Persistence layer for pipeline execution history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{Pipeline, StepState, TriggerKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of one step, as kept in the history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,

    /// Final state label (`succeeded`, `failed (tolerated)`, ...)
    pub status: String,

    /// Exit code for steps that failed with one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Captured output
    #[serde(default)]
    pub log: String,
}

impl StepRecord {
    fn from_state(id: &str, state: &StepState) -> Self {
        let exit_code = match state {
            StepState::Failed { failure, .. } => failure.exit_code(),
            _ => None,
        };
        Self {
            id: id.to_string(),
            status: state.label().to_string(),
            exit_code,
            log: state.log().unwrap_or_default().to_string(),
        }
    }
}

/// Summary of a pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Execution status
    pub status: ExecutionStatus,

    /// Kind of event that started the run
    pub trigger: Option<TriggerKind>,

    pub repository_owner: Option<String>,
    pub label: Option<String>,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Progress (0.0 to 1.0)
    pub progress: f64,

    pub succeeded_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,

    /// Total number of steps
    pub total_steps: usize,

    /// Step whose failure failed the run
    pub failed_step: Option<String>,

    /// Why it failed (`exit code 1`, `timed out after 60 seconds`, ...)
    pub failure_reason: Option<String>,

    /// Why the run was skipped
    pub skip_reason: Option<String>,

    /// Per-step outcomes in declared order
    pub steps: Vec<StepRecord>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline execution
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all executions for a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent execution of a pipeline
    async fn get_latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>>;

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn get_latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(pipeline_name).await?.into_iter().next())
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a pipeline
pub fn create_summary(pipeline: &Pipeline) -> ExecutionSummary {
    let state = &pipeline.state;
    ExecutionSummary {
        execution_id: state.execution_id,
        pipeline_name: pipeline.name.clone(),
        status: state.status,
        trigger: pipeline.event.as_ref().map(|e| e.kind),
        repository_owner: pipeline.event.as_ref().map(|e| e.repository_owner.clone()),
        label: pipeline.event.as_ref().and_then(|e| e.label_name.clone()),
        started_at: state.started_at.unwrap_or_else(Utc::now),
        completed_at: state.completed_at,
        progress: state.progress(),
        succeeded_steps: state.succeeded_steps,
        failed_steps: state.failed_steps,
        skipped_steps: state.skipped_steps,
        total_steps: state.total_steps,
        failed_step: state.failure.as_ref().map(|f| f.step_id.clone()),
        failure_reason: state.failure.as_ref().map(|f| f.kind.to_string()),
        skip_reason: state.skip_reason.clone(),
        steps: pipeline
            .steps
            .iter()
            .map(|s| StepRecord::from_state(&s.id, &s.state))
            .collect(),
    }
}
