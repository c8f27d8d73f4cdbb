//! Managed actions - named step implementations provided by the runner
//!
//! An action receives its rendered parameters and a read-only view of the
//! step environment, and answers with the environment mutations it wants
//! applied to the run. Only keys returned by [`Action::declared_keys`] may be
//! mutated.

pub mod checkout;
pub mod coverage;
pub mod provision;
pub mod toolchain;

use crate::{
    core::{EnvMutation, EnvironmentContext, Pipeline, StepKind},
    execution::runner::{CommandOutput, CommandRequest, CommandRunner, RunnerError},
};
use anyhow::bail;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use checkout::Checkout;
pub use coverage::{CommandSink, CoverageSink, DirectorySink, UploadCoverage};
pub use toolchain::{SetupMpi, SetupPython, SetupTool};

/// Error types for action execution
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    #[error("invalid value for '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("'{command}' exited with code {code}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Output of the command that caused the error, if any
    pub fn output(&self) -> &str {
        match self {
            ActionError::CommandFailed { output, .. } => output,
            ActionError::Runner(e) => e.output(),
            _ => "",
        }
    }
}

/// What an action hands back to the executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    /// Mutations to apply to the run environment on success
    pub mutations: Vec<EnvMutation>,

    /// Human readable log of what the action did
    pub log: String,
}

impl ActionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_line(&mut self, line: impl AsRef<str>) {
        self.log.push_str(line.as_ref());
        self.log.push('\n');
    }

    /// Append command output to the log
    pub fn log_output(&mut self, output: &str) {
        if output.is_empty() {
            return;
        }
        self.log.push_str(output);
        if !output.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

/// Everything an action may look at while it runs
pub struct ActionContext<'a> {
    pub step_id: &'a str,

    /// Parameters with placeholders already rendered
    pub params: &'a BTreeMap<String, String>,

    /// Effective environment of the step
    pub env: &'a EnvironmentContext,

    pub runner: &'a dyn CommandRunner,
    pub cancel: &'a CancellationToken,
}

impl<'a> ActionContext<'a> {
    /// A parameter value; empty strings count as absent
    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.params
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, name: &str) -> Result<&'a str, ActionError> {
        self.param(name)
            .ok_or_else(|| ActionError::MissingParam(name.to_string()))
    }

    /// Boolean parameter accepting true/false
    pub fn flag(&self, name: &str, default: bool) -> Result<bool, ActionError> {
        match self.param(name) {
            None => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(ActionError::InvalidParam {
                name: name.to_string(),
                reason: format!("expected true or false, got '{}'", v),
            }),
        }
    }

    /// Run a program under `env`, failing on a non-zero exit code
    pub async fn run_program_in(
        &self,
        env: &EnvironmentContext,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, ActionError> {
        let request = CommandRequest {
            program: program.to_string(),
            args: args.to_vec(),
            env: env.vars().clone(),
            working_dir: env.working_dir().to_path_buf(),
            timeout: None,
        };
        let output = self.runner.run(&request, self.cancel).await?;
        if !output.success() {
            return Err(ActionError::CommandFailed {
                command: request.display(),
                code: output.exit_code,
                output: output.combined(),
            });
        }
        Ok(output)
    }

    /// Run a program under the step environment
    pub async fn run_program(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, ActionError> {
        self.run_program_in(self.env, program, args).await
    }

    /// Run a shell snippet with `sh -e -c`
    pub async fn run_shell(&self, script: &str) -> Result<CommandOutput, ActionError> {
        self.run_program("sh", &["-e".to_string(), "-c".to_string(), script.to_string()])
            .await
    }
}

/// Trait for managed actions - allows for different implementations
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used in `uses:`
    fn name(&self) -> &'static str;

    /// Environment keys this action may mutate for the given parameters
    fn declared_keys(&self, params: &BTreeMap<String, String>) -> Vec<String>;

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError>;
}

/// Lookup table of the available actions
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Checkout);
        registry.register(SetupPython);
        registry.register(SetupMpi);
        registry.register(SetupTool);
        registry.register(UploadCoverage::new());
        registry
    }

    /// Add an action, replacing any with the same name
    pub fn register<A: Action + 'static>(&mut self, action: A) {
        self.actions
            .insert(action.name().to_string(), Arc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check that every action step refers to a registered action
    pub fn validate(&self, pipeline: &Pipeline) -> anyhow::Result<()> {
        for step in &pipeline.steps {
            if let StepKind::Action { name, .. } = &step.kind {
                if !self.actions.contains_key(name) {
                    bail!(
                        "Step '{}' uses unknown action '{}' (available: {})",
                        step.id,
                        name,
                        self.names().join(", ")
                    );
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
