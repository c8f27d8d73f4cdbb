//! Toolchain provisioners: Python, MPI and generic prefix-installed tools
//!
//! Each provisioner locates (optionally installs) a toolchain, verifies it
//! resolves under the environment it is about to produce, and reports the
//! `PATH`/home-variable changes as mutations.

use super::provision::{
    library_path_var, locate, run_install, validate_var_name, verify, Provisioning,
};
use super::{Action, ActionContext, ActionError, ActionOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Variables consulted for a pre-populated tool cache, in order
const TOOL_CACHE_VARS: &[&str] = &["PIPELINE_TOOL_CACHE", "RUNNER_TOOL_CACHE"];

/// `setup-python`: put a Python interpreter of the requested version on `PATH`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupPython;

impl SetupPython {
    fn find_prefix(ctx: &ActionContext<'_>, version: &str) -> Result<PathBuf, ActionError> {
        if let Some(prefix) = ctx.param("prefix") {
            return Ok(ctx.env.resolve(prefix));
        }

        for var in TOOL_CACHE_VARS {
            if let Some(cache) = ctx.env.get_opt(var).filter(|v| !v.is_empty()) {
                let candidate = Path::new(cache).join("Python").join(version);
                if candidate.join("bin").is_dir() {
                    return Ok(candidate);
                }
            }
        }

        let binary = format!("python{}", version);
        match locate(&binary, ctx.env) {
            Some(found) => found
                .parent()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    ActionError::Failed(format!("cannot derive prefix from {}", found.display()))
                }),
            None => Err(ActionError::Failed(format!(
                "Python {} not found: no prefix given, not in the tool cache and {} is not on PATH",
                version, binary
            ))),
        }
    }
}

/// Whether `python --version` output reports `requested`
fn version_matches(reported: &str, requested: &str) -> bool {
    reported
        .split_whitespace()
        .nth(1)
        .and_then(|actual| actual.strip_prefix(requested))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

#[async_trait]
impl Action for SetupPython {
    fn name(&self) -> &'static str {
        "setup-python"
    }

    fn declared_keys(&self, _params: &BTreeMap<String, String>) -> Vec<String> {
        [
            "PATH",
            "PKG_CONFIG_PATH",
            "pythonLocation",
            "Python_ROOT_DIR",
            "Python3_ROOT_DIR",
        ]
        .iter()
        .map(|k| k.to_string())
        .collect()
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
        let version = ctx.require("python-version")?;
        let mut output = ActionOutput::new();
        run_install(ctx, &mut output).await?;

        let prefix = Self::find_prefix(ctx, version)?;
        let location = prefix.display().to_string();
        info!("[{}] using Python {} from {}", ctx.step_id, version, location);

        let mut provisioning = Provisioning::new();
        provisioning
            .set("pythonLocation", location.clone())
            .set("Python_ROOT_DIR", location.clone())
            .set("Python3_ROOT_DIR", location)
            .prepend("PKG_CONFIG_PATH", prefix.join("lib").join("pkgconfig"))
            .add_bin_dir(prefix.join("bin"));

        let preview = provisioning.preview(ctx.env);
        let interpreter = locate(&format!("python{}", version), &preview)
            .or_else(|| locate("python3", &preview))
            .ok_or_else(|| {
                ActionError::Failed(format!("no Python interpreter in {}", prefix.display()))
            })?;

        let program = interpreter.display().to_string();
        let reported = ctx
            .run_program_in(&preview, &program, &["--version".to_string()])
            .await?;
        let reported = reported.combined();
        if !version_matches(reported.trim(), version) {
            return Err(ActionError::Failed(format!(
                "{} reports '{}', expected Python {}",
                program,
                reported.trim(),
                version
            )));
        }
        output.log_line(format!("{} ({})", reported.trim(), program));

        Ok(provisioning.into_output(output))
    }
}

/// MPI implementations `setup-mpi` knows about
const MPI_IMPLEMENTATIONS: &[&str] = &["mpich", "openmpi", "intelmpi"];

/// `setup-mpi`: make an MPI compiler wrapper and runtime available
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupMpi;

impl SetupMpi {
    fn candidates(ctx: &ActionContext<'_>, implementation: &str) -> Vec<PathBuf> {
        match ctx.param("prefix") {
            Some(prefix) => vec![ctx.env.resolve(prefix)],
            None => vec![
                PathBuf::from("/usr/lib64").join(implementation),
                PathBuf::from("/usr/lib").join(implementation),
                PathBuf::from("/opt").join(implementation),
            ],
        }
    }
}

#[async_trait]
impl Action for SetupMpi {
    fn name(&self) -> &'static str {
        "setup-mpi"
    }

    fn declared_keys(&self, _params: &BTreeMap<String, String>) -> Vec<String> {
        let mut keys = vec!["PATH".to_string(), "MPI_HOME".to_string()];
        if library_path_var() != "PATH" {
            keys.push(library_path_var().to_string());
        }
        keys
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
        let implementation = ctx.param("mpi").unwrap_or("mpich");
        if !MPI_IMPLEMENTATIONS.contains(&implementation) {
            return Err(ActionError::InvalidParam {
                name: "mpi".to_string(),
                reason: format!(
                    "unknown implementation '{}' (expected one of {})",
                    implementation,
                    MPI_IMPLEMENTATIONS.join(", ")
                ),
            });
        }

        let mut output = ActionOutput::new();
        run_install(ctx, &mut output).await?;

        let mut provisioning = Provisioning::new();
        let home = Self::candidates(ctx, implementation)
            .into_iter()
            .find(|prefix| prefix.join("bin").join("mpicc").is_file());

        match home {
            Some(home) => {
                provisioning
                    .set("MPI_HOME", home.display().to_string())
                    .add_bin_dir(home.join("bin"));
                if home.join("lib").is_dir() {
                    provisioning.add_lib_dir(home.join("lib"));
                }
            }
            None if ctx.param("prefix").is_none() => {
                // System packages put the wrapper straight into /usr/bin
                let mpicc = locate("mpicc", ctx.env).ok_or_else(|| {
                    ActionError::Failed(format!("mpicc for {} not found", implementation))
                })?;
                let home = mpicc
                    .parent()
                    .and_then(Path::parent)
                    .unwrap_or_else(|| Path::new("/"));
                provisioning.set("MPI_HOME", home.display().to_string());
            }
            None => {
                return Err(ActionError::Failed(format!(
                    "no mpicc under {}/bin",
                    ctx.param("prefix").unwrap_or_default()
                )))
            }
        }

        let mpicc = verify("mpicc", &provisioning.preview(ctx.env))?;
        info!("[{}] {} compiler wrapper: {}", ctx.step_id, implementation, mpicc.display());
        output.log_line(format!("{}: {}", implementation, mpicc.display()));

        Ok(provisioning.into_output(output))
    }
}

/// `setup-tool`: expose a prefix-installed tool such as CMake or LAMMPS
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupTool;

#[async_trait]
impl Action for SetupTool {
    fn name(&self) -> &'static str {
        "setup-tool"
    }

    fn declared_keys(&self, params: &BTreeMap<String, String>) -> Vec<String> {
        let mut keys = vec!["PATH".to_string()];
        if params.get("library-dir").is_some_and(|v| !v.trim().is_empty()) {
            keys.push(library_path_var().to_string());
        }
        if let Some(var) = params.get("home-var").map(|v| v.trim()).filter(|v| !v.is_empty()) {
            keys.push(var.to_string());
        }
        keys
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionError> {
        let binary = ctx.require("binary")?;
        if let Some(var) = ctx.param("home-var") {
            validate_var_name("home-var", var)?;
        }

        let mut output = ActionOutput::new();
        run_install(ctx, &mut output).await?;

        let mut provisioning = Provisioning::new();
        if let Some(prefix) = ctx.param("prefix") {
            let prefix = ctx.env.resolve(prefix);
            provisioning.add_bin_dir(prefix.join(ctx.param("bin-dir").unwrap_or("bin")));
            if let Some(lib) = ctx.param("library-dir") {
                provisioning.add_lib_dir(prefix.join(lib));
            }
            if let Some(var) = ctx.param("home-var") {
                provisioning.set(var, prefix.display().to_string());
            }
        } else if ctx.param("library-dir").is_some() || ctx.param("home-var").is_some() {
            return Err(ActionError::MissingParam("prefix".to_string()));
        }

        let found = verify(binary, &provisioning.preview(ctx.env))?;
        info!("[{}] {} resolved to {}", ctx.step_id, binary, found.display());
        output.log_line(format!("{}: {}", binary, found.display()));

        Ok(provisioning.into_output(output))
    }
}
