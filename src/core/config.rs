//! Pipeline configuration from YAML

use crate::core::{
    step::{Shell, Step, StepKind, StepPolicy},
    trigger::TriggerPolicy,
    Pipeline,
};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Events allowed to start the pipeline
    #[serde(default, rename = "on")]
    pub triggers: TriggerConfig,

    /// Variables set for every step
    #[serde(default)]
    env: BTreeMap<String, Value>,

    /// Default timeout for steps without their own (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Pipeline steps, in execution order
    pub steps: Vec<StepConfig>,
}

/// Trigger section (`on:`)
///
/// Manual dispatch is always accepted; `labeled` opts in to labeled events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub labeled: Option<LabeledTrigger>,
}

/// A labeled pull-request event that starts the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledTrigger {
    /// Label that must be added
    pub label: String,

    /// Repository owner the event must come from
    pub owner: String,
}

/// When a step runs relative to the overall run status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCondition {
    /// Only while no fatal failure happened
    #[default]
    Success,
    /// Regardless of earlier failures
    Always,
}

/// Shell selection: a name (`bash`, `sh`, `python3 -c {0}`) or an argv list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShellConfig {
    Name(String),
    Argv(Vec<String>),
}

impl ShellConfig {
    fn to_shell(&self) -> Shell {
        match self {
            ShellConfig::Name(name) => Shell::from_name(name),
            ShellConfig::Argv(argv) => Shell::Custom(argv.clone()),
        }
    }
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier (generated from the position when omitted)
    #[serde(default)]
    pub id: Option<String>,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// Managed action to run, optionally suffixed with `@ref`
    #[serde(default)]
    pub uses: Option<String>,

    /// Action parameters
    #[serde(default)]
    with: BTreeMap<String, Value>,

    /// Shell script to run
    #[serde(default)]
    pub run: Option<String>,

    /// Shell used for `run`
    #[serde(default)]
    pub shell: Option<ShellConfig>,

    /// Variables layered over the run environment for this step
    #[serde(default)]
    env: BTreeMap<String, Value>,

    /// Record a failure without aborting the run
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,

    /// Run condition
    #[serde(default, rename = "if")]
    pub condition: StepCondition,

    /// Timeout for this step in seconds (overrides the pipeline default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Timeout for this step in minutes
    #[serde(default, alias = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    /// Working directory relative to the workspace
    #[serde(default, alias = "working-directory")]
    pub working_directory: Option<String>,
}

impl StepConfig {
    /// Identifier, falling back to `step-<position>` (1-based)
    pub fn resolved_id(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("step-{}", index + 1))
    }

    /// Failure policy derived from `continue_on_error` and `if`
    pub fn policy(&self) -> StepPolicy {
        match (self.condition, self.continue_on_error) {
            (StepCondition::Always, _) => StepPolicy::Always,
            (StepCondition::Success, true) => StepPolicy::NonFatal,
            (StepCondition::Success, false) => StepPolicy::Fatal,
        }
    }

    /// Action parameters rendered as strings
    pub fn params(&self) -> BTreeMap<String, String> {
        self.with
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect()
    }

    /// Environment overlay rendered as strings
    pub fn env_overlay(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect()
    }

    fn timeout(&self, default_secs: Option<u64>) -> Option<Duration> {
        self.timeout_secs
            .or(self.timeout_minutes.map(|m| m * 60))
            .or(default_secs)
            .map(Duration::from_secs)
    }

    /// Build the step domain model
    pub fn to_step(&self, index: usize, default_timeout_secs: Option<u64>) -> Step {
        let id = self.resolved_id(index);
        let kind = match (&self.uses, &self.run) {
            (Some(uses), _) => StepKind::Action {
                name: action_name(uses).to_string(),
                params: self.params(),
            },
            (None, script) => StepKind::Command {
                script: script.clone().unwrap_or_default(),
                shell: self.shell.as_ref().map(ShellConfig::to_shell).unwrap_or_default(),
            },
        };

        Step {
            name: self.name.clone().unwrap_or_else(|| id.clone()),
            id,
            kind,
            env: self.env_overlay(),
            policy: self.policy(),
            timeout: self.timeout(default_timeout_secs),
            working_directory: self.working_directory.as_ref().map(PathBuf::from),
            state: crate::core::state::StepState::Pending,
        }
    }
}

/// Strip an `@ref` suffix: `setup-python@v5` -> `setup-python`
pub fn action_name(uses: &str) -> &str {
    uses.split_once('@').map(|(name, _)| name).unwrap_or(uses)
}

/// Render a YAML scalar the way it would appear in an environment variable
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        if self.default_timeout_secs == Some(0) {
            anyhow::bail!("Default step timeout must be greater than zero");
        }

        let id_pattern = Regex::new(r"^[A-Za-z0-9_-]+$")?;
        let mut seen_ids = HashSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            let id = step.resolved_id(index);

            if !id_pattern.is_match(&id) {
                anyhow::bail!(
                    "Step id '{}' may only contain letters, digits, '-' and '_'",
                    id
                );
            }
            if !seen_ids.insert(id.clone()) {
                anyhow::bail!("Duplicate step ID: {}", id);
            }

            match (&step.uses, &step.run) {
                (Some(_), Some(_)) => {
                    anyhow::bail!("Step '{}' must set either 'uses' or 'run', not both", id)
                }
                (None, None) => anyhow::bail!("Step '{}' must set 'uses' or 'run'", id),
                (Some(uses), None) if action_name(uses).is_empty() => {
                    anyhow::bail!("Step '{}' has an empty action name", id)
                }
                (None, Some(run)) if run.trim().is_empty() => {
                    anyhow::bail!("Step '{}' has an empty 'run' script", id)
                }
                _ => {}
            }

            if step.uses.is_some() && step.shell.is_some() {
                anyhow::bail!("Step '{}' sets 'shell' on an action step", id);
            }
            let empty_shell = match &step.shell {
                Some(ShellConfig::Name(name)) => name.trim().is_empty(),
                Some(ShellConfig::Argv(argv)) => {
                    argv.first().map_or(true, |program| program.trim().is_empty())
                }
                None => false,
            };
            if empty_shell {
                anyhow::bail!("Step '{}' has an empty shell command", id);
            }
            if step.continue_on_error && step.condition == StepCondition::Always {
                anyhow::bail!(
                    "Step '{}' combines 'continue_on_error' with 'if: always'",
                    id
                );
            }
            if step.timeout_secs.is_some() && step.timeout_minutes.is_some() {
                anyhow::bail!(
                    "Step '{}' sets both 'timeout_secs' and 'timeout_minutes'",
                    id
                );
            }
            if step.timeout_secs == Some(0) || step.timeout_minutes == Some(0) {
                anyhow::bail!("Step '{}' has a zero timeout", id);
            }
        }

        if let Some(labeled) = &self.triggers.labeled {
            if labeled.label.trim().is_empty() || labeled.owner.trim().is_empty() {
                anyhow::bail!("Labeled trigger needs both 'label' and 'owner'");
            }
        }

        Ok(())
    }

    /// Pipeline-level variables rendered as strings
    pub fn variables(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect()
    }

    /// Trigger policy described by the `on:` section
    pub fn trigger_policy(&self) -> TriggerPolicy {
        match &self.triggers.labeled {
            Some(labeled) => TriggerPolicy::new(labeled.label.clone(), labeled.owner.clone()),
            None => TriggerPolicy::manual_only(),
        }
    }

    /// Build the ordered step list
    pub fn to_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| step.to_step(index, self.default_timeout_secs))
            .collect()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
