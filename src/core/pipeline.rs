//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    environment::EnvironmentContext,
    state::{PipelineState, StepState},
    step::Step,
    trigger::{TriggerEvent, TriggerPolicy},
};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One run of a pipeline definition
///
/// The pipeline owns its steps and its environment exclusively; separate
/// runs never share either.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Which events may start this pipeline
    pub trigger: TriggerPolicy,

    /// Pipeline-level variables, applied after the built-in run variables
    pub variables: BTreeMap<String, String>,

    /// Environment shared by the steps of this run
    pub env: EnvironmentContext,

    /// Steps in execution order
    pub steps: Vec<Step>,

    /// Execution state
    pub state: PipelineState,

    /// Event that started the run, once evaluated
    pub event: Option<TriggerEvent>,
}

impl Pipeline {
    /// Create a pipeline from configuration, inheriting the process environment
    pub fn from_config(config: &PipelineConfig) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(
            config.name.clone(),
            config.to_steps(),
            EnvironmentContext::from_process(working_dir),
        )
        .with_trigger(config.trigger_policy())
        .with_variables(config.variables())
    }

    /// Create a pipeline from explicit steps and base environment
    pub fn new(name: impl Into<String>, steps: Vec<Step>, env: EnvironmentContext) -> Self {
        Pipeline {
            name: name.into(),
            trigger: TriggerPolicy::manual_only(),
            variables: BTreeMap::new(),
            env,
            steps,
            state: PipelineState::new(),
            event: None,
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Replace the base environment (e.g. to not inherit the process env)
    pub fn with_environment(mut self, env: EnvironmentContext) -> Self {
        self.env = env;
        self
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step ids in declared order
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Ids of the steps that actually ran, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state.was_executed())
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Check if every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.state.is_terminal())
    }

    /// Seed the run environment with the built-in variables and the
    /// pipeline-level variables
    pub fn initialize_env(&mut self, event: &TriggerEvent) {
        let workspace = self.env.working_dir().display().to_string();
        self.env.set("CI", "true");
        self.env.set("PIPELINE_WORKSPACE", workspace);
        self.env.set("PIPELINE_RUN_ID", self.state.execution_id.to_string());
        self.env.set("PIPELINE_EVENT", event.kind.as_str());
        self.env
            .set("PIPELINE_REPOSITORY_OWNER", event.repository_owner.clone());
        if let Some(label) = &event.label_name {
            self.env.set("PIPELINE_LABEL", label.clone());
        }
        for (key, value) in &self.variables {
            self.env.set(key.clone(), value.clone());
        }
    }

    /// Recompute the step counters in the pipeline state
    pub fn update_counts(&mut self) {
        self.state.update_counts(self.steps.iter().map(|s| &s.state));
    }

    /// Mark every pending step with the given state
    pub fn mark_pending(&mut self, state: StepState) {
        for step in self.steps.iter_mut() {
            if matches!(step.state, StepState::Pending) {
                step.state = state.clone();
            }
        }
    }
}
