//! Trigger evaluation - decides whether an incoming event starts a run

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Reason recorded when an event does not satisfy the trigger policy
pub const TRIGGER_NOT_MET: &str = "trigger condition not met";

/// Kind of event that asked for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Someone dispatched the pipeline by hand
    Manual,
    /// A label was added to a pull request
    Labeled,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Labeled => "labeled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(TriggerKind::Manual),
            "labeled" => Some(TriggerKind::Labeled),
            _ => None,
        }
    }
}

/// Immutable description of why a run was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,

    /// Owner of the repository the event came from
    #[serde(default)]
    pub repository_owner: String,

    /// Label text for labeled events
    #[serde(default)]
    pub label_name: Option<String>,
}

impl TriggerEvent {
    pub fn manual(repository_owner: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            repository_owner: repository_owner.into(),
            label_name: None,
        }
    }

    pub fn labeled(repository_owner: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Labeled,
            repository_owner: repository_owner.into(),
            label_name: Some(label.into()),
        }
    }

    /// Load an event descriptor from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid event descriptor in {}", path.display()))
    }
}

/// Outcome of evaluating a trigger event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Proceed,
    Skip { reason: String },
}

impl TriggerDecision {
    pub fn proceeds(&self) -> bool {
        matches!(self, TriggerDecision::Proceed)
    }
}

/// Which labeled events are allowed to start a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    /// Label that must be added to start a run
    pub watch_label: Option<String>,

    /// Repository owner the labeled event must come from
    pub allowed_owner: Option<String>,
}

impl TriggerPolicy {
    pub fn new(watch_label: impl Into<String>, allowed_owner: impl Into<String>) -> Self {
        Self {
            watch_label: Some(watch_label.into()),
            allowed_owner: Some(allowed_owner.into()),
        }
    }

    /// Policy that only accepts manual dispatch
    pub fn manual_only() -> Self {
        Self::default()
    }

    /// Evaluate an event. Manual dispatch always proceeds; a labeled event
    /// proceeds only when both the label and the repository owner match.
    pub fn evaluate(&self, event: &TriggerEvent) -> TriggerDecision {
        let proceed = match event.kind {
            TriggerKind::Manual => true,
            TriggerKind::Labeled => {
                let label_matches = match (&self.watch_label, &event.label_name) {
                    (Some(watch), Some(label)) => watch == label,
                    _ => false,
                };
                let owner_matches = self
                    .allowed_owner
                    .as_deref()
                    .is_some_and(|owner| owner == event.repository_owner);
                label_matches && owner_matches
            }
        };

        if proceed {
            TriggerDecision::Proceed
        } else {
            TriggerDecision::Skip {
                reason: TRIGGER_NOT_MET.to_string(),
            }
        }
    }
}
