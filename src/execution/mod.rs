//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod runner;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{StepExecutor, StepOutcome};
pub use runner::{CommandOutput, CommandRequest, CommandRunner, ProcessRunner, RunnerError};
