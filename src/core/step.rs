//! Step domain model

use crate::core::{environment::EnvironmentContext, state::StepState};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// What the step does
    pub kind: StepKind,

    /// Variables layered over the run environment for this step only
    pub env: HashMap<String, String>,

    /// How a failure of this step affects the run
    pub policy: StepPolicy,

    /// Maximum duration before the step is killed
    pub timeout: Option<Duration>,

    /// Working directory relative to the run's working directory
    pub working_directory: Option<PathBuf>,

    /// Runtime state
    pub state: StepState,
}

/// The work a step performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// A managed action looked up in the action registry
    Action {
        name: String,
        params: BTreeMap<String, String>,
    },
    /// A shell script
    Command { script: String, shell: Shell },
}

/// Interpreter used for command steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shell {
    /// `bash --noprofile --norc -eo pipefail -c <script>`
    #[default]
    Bash,
    /// `sh -e -c <script>`
    Sh,
    /// Custom argv; a `{0}` argument is replaced by the script, otherwise the
    /// script is appended
    Custom(Vec<String>),
}

impl Shell {
    /// Parse a shell name from a pipeline file
    pub fn from_name(name: &str) -> Self {
        match name {
            "bash" => Shell::Bash,
            "sh" => Shell::Sh,
            other => Shell::Custom(other.split_whitespace().map(str::to_string).collect()),
        }
    }

    /// Program and arguments that run `script`
    pub fn command_line(&self, script: &str) -> (String, Vec<String>) {
        match self {
            Shell::Bash => (
                "bash".to_string(),
                ["--noprofile", "--norc", "-eo", "pipefail", "-c", script]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            Shell::Sh => (
                "sh".to_string(),
                vec!["-e".to_string(), "-c".to_string(), script.to_string()],
            ),
            Shell::Custom(argv) => {
                let mut args: Vec<String> = argv.iter().skip(1).cloned().collect();
                if let Some(slot) = args.iter_mut().find(|arg| arg.as_str() == "{0}") {
                    *slot = script.to_string();
                } else {
                    args.push(script.to_string());
                }
                (argv.first().cloned().unwrap_or_default(), args)
            }
        }
    }
}

/// Failure policy of a step
///
/// `Always` steps run even after a fatal failure; their own failure is fatal
/// only when nothing failed before them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Runs while the run is healthy; failure aborts the run
    #[default]
    Fatal,
    /// Runs while the run is healthy; failure is recorded and the run continues
    NonFatal,
    /// Runs regardless of earlier failures
    Always,
}

impl StepPolicy {
    /// Whether a step with this policy runs, given the current run health
    pub fn should_run(&self, run_failed: bool) -> bool {
        !run_failed || matches!(self, StepPolicy::Always)
    }

    /// Whether a failure of this step leaves the run status untouched
    pub fn tolerates_failure(&self, run_failed: bool) -> bool {
        match self {
            StepPolicy::Fatal => false,
            StepPolicy::NonFatal => true,
            StepPolicy::Always => run_failed,
        }
    }
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("template pattern is valid")
    })
}

/// Replace `{{ KEY }}` placeholders with values from `env`
pub fn render_template(template: &str, env: &EnvironmentContext) -> String {
    template_pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| env.get(&caps[1]).to_string())
        .into_owned()
}

impl Step {
    /// Create a command step with default settings
    pub fn command(id: impl Into<String>, script: impl Into<String>) -> Self {
        let id = id.into();
        Step {
            name: id.clone(),
            id,
            kind: StepKind::Command {
                script: script.into(),
                shell: Shell::default(),
            },
            env: HashMap::new(),
            policy: StepPolicy::default(),
            timeout: None,
            working_directory: None,
            state: StepState::Pending,
        }
    }

    /// Create an action step with default settings
    pub fn action(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Step {
            name: id.clone(),
            id,
            kind: StepKind::Action {
                name: name.into(),
                params: BTreeMap::new(),
            },
            env: HashMap::new(),
            policy: StepPolicy::default(),
            timeout: None,
            working_directory: None,
            state: StepState::Pending,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let StepKind::Action { params, .. } = &mut self.kind {
            params.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_shell(mut self, new_shell: Shell) -> Self {
        if let StepKind::Command { shell, .. } = &mut self.kind {
            *shell = new_shell;
        }
        self
    }

    /// Environment this step runs under: the run environment with the step's
    /// overlay on top and its working directory applied
    pub fn effective_env(&self, base: &EnvironmentContext) -> EnvironmentContext {
        let mut env = base.merged(&self.env);
        if let Some(dir) = &self.working_directory {
            let resolved = base.resolve(dir);
            env.set_working_dir(resolved);
        }
        env
    }

    /// Action parameters with `{{ KEY }}` placeholders rendered against `env`
    pub fn render_params(&self, env: &EnvironmentContext) -> BTreeMap<String, String> {
        match &self.kind {
            StepKind::Action { params, .. } => params
                .iter()
                .map(|(key, value)| (key.clone(), render_template(value, env)))
                .collect(),
            StepKind::Command { .. } => BTreeMap::new(),
        }
    }

    /// Short description used in logs and output
    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::Action { name, .. } => format!("uses {}", name),
            StepKind::Command { script, .. } => {
                let first_line = script.lines().next().unwrap_or_default();
                if script.lines().nth(1).is_some() {
                    format!("run {} ...", first_line)
                } else {
                    format!("run {}", first_line)
                }
            }
        }
    }
}
