//! Environment context - the mutable variable state shared by the steps of one run

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Separator used for path-list variables such as `PATH`
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';

/// Separator used for path-list variables such as `PATH`
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// A single change to an environment context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnvMutation {
    /// Insert or overwrite a variable
    Set { key: String, value: String },
    /// Insert an entry at the front of a path-list variable
    PrependPath { key: String, value: String },
    /// Remove a variable
    Unset { key: String },
}

impl EnvMutation {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        EnvMutation::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn prepend_path(key: impl Into<String>, value: impl Into<String>) -> Self {
        EnvMutation::PrependPath {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The variable this mutation touches
    pub fn key(&self) -> &str {
        match self {
            EnvMutation::Set { key, .. }
            | EnvMutation::PrependPath { key, .. }
            | EnvMutation::Unset { key } => key,
        }
    }
}

/// Variables and working directory visible to the steps of a pipeline run
///
/// A run owns exactly one context. Steps never see it directly: the engine
/// hands each step a [`merged`](EnvironmentContext::merged) copy carrying the
/// step's overlay, and only mutations reported back by a successful step are
/// applied to the run's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    vars: BTreeMap<String, String>,
    working_dir: PathBuf,
}

impl EnvironmentContext {
    /// Create an empty context rooted at `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: BTreeMap::new(),
            working_dir: working_dir.into(),
        }
    }

    /// Create a context seeded from the current process environment
    pub fn from_process(working_dir: impl Into<PathBuf>) -> Self {
        let mut context = Self::new(working_dir);
        context.vars.extend(std::env::vars());
        context
    }

    /// Insert or overwrite a variable
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Get a variable, or the empty string when it is not set
    pub fn get(&self, key: &str) -> &str {
        self.vars.get(key).map(String::as_str).unwrap_or("")
    }

    /// Get a variable only if it is set
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// Insert `value` in front of the existing entries of a path-list variable.
    ///
    /// Existing entries keep their order. Duplicates are not removed.
    pub fn prepend_path(&mut self, key: &str, value: &str) {
        let updated = match self.vars.get(key) {
            Some(existing) if !existing.is_empty() => {
                format!("{}{}{}", value, PATH_LIST_SEPARATOR, existing)
            }
            _ => value.to_string(),
        };
        self.vars.insert(key.to_string(), updated);
    }

    /// Split a path-list variable into its entries
    pub fn path_entries(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .split(PATH_LIST_SEPARATOR)
            .filter(|entry| !entry.is_empty())
            .collect()
    }

    /// Apply a sequence of mutations in order
    pub fn apply(&mut self, mutations: &[EnvMutation]) {
        for mutation in mutations {
            match mutation {
                EnvMutation::Set { key, value } => self.set(key.clone(), value.clone()),
                EnvMutation::PrependPath { key, value } => self.prepend_path(key, value),
                EnvMutation::Unset { key } => {
                    self.vars.remove(key);
                }
            }
        }
    }

    /// Copy of this context with `overlay` applied on top (overlay wins)
    pub fn merged(&self, overlay: &HashMap<String, String>) -> Self {
        let mut context = self.clone();
        context
            .vars
            .extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    /// Resolve a possibly relative path against the working directory
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Flat view of all variables, as handed to a child process
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
