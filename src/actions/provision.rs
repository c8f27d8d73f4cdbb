//! Shared plumbing for toolchain provisioners

use super::{ActionContext, ActionError, ActionOutput};
use crate::core::{EnvMutation, EnvironmentContext};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Variable searched by the dynamic loader on this platform
pub fn library_path_var() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Find `binary` on the `PATH` of `env`
pub fn locate(binary: &str, env: &EnvironmentContext) -> Option<PathBuf> {
    let path = env.get_opt("PATH")?;
    match which::which_in(binary, Some(path), env.working_dir()) {
        Ok(found) => Some(found),
        Err(e) => {
            debug!("{} not found on PATH: {}", binary, e);
            None
        }
    }
}

/// Environment changes a provisioner is about to make
#[derive(Debug, Clone, Default)]
pub struct Provisioning {
    vars: Vec<(String, String)>,
    bin_dirs: Vec<PathBuf>,
    lib_dirs: Vec<PathBuf>,
    extra: Vec<EnvMutation>,
}

impl Provisioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    /// Put a directory in front of `PATH`
    pub fn add_bin_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.bin_dirs.push(dir.into());
        self
    }

    /// Put a directory in front of the library search path
    pub fn add_lib_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.lib_dirs.push(dir.into());
        self
    }

    /// Prepend to some other path-list variable
    pub fn prepend(&mut self, key: impl Into<String>, dir: impl AsRef<Path>) -> &mut Self {
        self.extra.push(EnvMutation::prepend_path(
            key,
            dir.as_ref().display().to_string(),
        ));
        self
    }

    /// Mutations in application order
    ///
    /// Directories are prepended in reverse so the first one added ends up
    /// first in the list.
    pub fn mutations(&self) -> Vec<EnvMutation> {
        let mut mutations: Vec<EnvMutation> = self
            .vars
            .iter()
            .map(|(k, v)| EnvMutation::set(k.clone(), v.clone()))
            .collect();
        mutations.extend(self.extra.iter().cloned());
        for dir in self.lib_dirs.iter().rev() {
            mutations.push(EnvMutation::prepend_path(
                library_path_var(),
                dir.display().to_string(),
            ));
        }
        for dir in self.bin_dirs.iter().rev() {
            mutations.push(EnvMutation::prepend_path("PATH", dir.display().to_string()));
        }
        mutations
    }

    /// `env` as it will look once the mutations are applied
    pub fn preview(&self, env: &EnvironmentContext) -> EnvironmentContext {
        let mut preview = env.clone();
        preview.apply(&self.mutations());
        preview
    }

    /// Finish the action: log the changes and hand them over
    pub fn into_output(self, mut output: ActionOutput) -> ActionOutput {
        for mutation in self.mutations() {
            match &mutation {
                EnvMutation::Set { key, value } => output.log_line(format!("{}={}", key, value)),
                EnvMutation::PrependPath { key, value } => {
                    output.log_line(format!("{} += {}", key, value))
                }
                EnvMutation::Unset { key } => output.log_line(format!("unset {}", key)),
            }
        }
        output.mutations = self.mutations();
        output
    }
}

/// Run an optional `install` parameter before locating the toolchain
pub async fn run_install(
    ctx: &ActionContext<'_>,
    output: &mut ActionOutput,
) -> Result<(), ActionError> {
    if let Some(script) = ctx.param("install") {
        info!("[{}] installing: {}", ctx.step_id, script);
        let result = ctx.run_shell(script).await?;
        output.log_output(&result.combined());
    }
    Ok(())
}

/// Require `binary` to resolve in `env`, returning its path
pub fn verify(binary: &str, env: &EnvironmentContext) -> Result<PathBuf, ActionError> {
    locate(binary, env).ok_or_else(|| {
        ActionError::Failed(format!(
            "{} not found on PATH after provisioning",
            binary
        ))
    })
}

/// Check that a variable name is usable
pub fn validate_var_name(param: &str, name: &str) -> Result<(), ActionError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ActionError::InvalidParam {
            name: param.to_string(),
            reason: format!("'{}' is not a valid variable name", name),
        })
    }
}
