//! ci-pipeline - an event-gated, fail-fast build-and-test pipeline runner

pub mod actions;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use actions::{Action, ActionContext, ActionError, ActionOutput, ActionRegistry};
pub use core::{
    EnvMutation, EnvironmentContext, ExecutionStatus, Pipeline, RunOutcome, Step, StepPolicy,
    StepState, TriggerEvent, TriggerPolicy,
};
pub use execution::{CommandRunner, ExecutionEngine, ExecutionEvent, ProcessRunner};
