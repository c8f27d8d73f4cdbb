//! CLI command definitions

use crate::core::TriggerEvent;
use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Kind of event starting the run
    #[arg(long, value_enum, default_value_t = EventArg::Manual)]
    pub event: EventArg,

    /// Repository owner the event comes from
    #[arg(long)]
    pub owner: Option<String>,

    /// Label added by a labeled event
    #[arg(long)]
    pub label: Option<String>,

    /// Read the trigger event from a JSON file instead
    #[arg(long, conflicts_with_all = ["event", "owner", "label"])]
    pub event_file: Option<PathBuf>,

    /// Working directory of the run (defaults to the current directory)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Variable overrides (KEY=VALUE), applied after the pipeline's env
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,

    /// Start from an empty environment instead of inheriting this process's
    /// (PATH and HOME are kept)
    #[arg(long)]
    pub clean_env: bool,
}

impl RunCommand {
    /// Trigger event described by the command line
    pub fn trigger_event(&self) -> Result<TriggerEvent> {
        if let Some(path) = &self.event_file {
            return TriggerEvent::from_file(path);
        }
        let owner = self.owner.clone().unwrap_or_default();
        match self.event {
            EventArg::Manual => {
                let mut event = TriggerEvent::manual(owner);
                event.label_name = self.label.clone();
                Ok(event)
            }
            EventArg::Labeled => match &self.label {
                Some(label) => Ok(TriggerEvent::labeled(owner, label.clone())),
                None => bail!("--event labeled requires --label"),
            },
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show step logs and full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Trigger event kind argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventArg {
    Manual,
    Labeled,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
