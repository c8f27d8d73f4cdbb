//! Step executor - runs individual steps against their effective environment

use crate::{
    actions::{ActionContext, ActionError, ActionRegistry},
    core::{EnvMutation, EnvironmentContext, FailureKind, Shell, Step, StepKind},
    execution::runner::{CommandRequest, CommandRunner, RunnerError},
};
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Variable naming the file a command step writes `KEY=VALUE` lines to
pub const ENV_FILE_VAR: &str = "PIPELINE_ENV";

/// Variable naming the file a command step writes `PATH` entries to
pub const PATH_FILE_VAR: &str = "PIPELINE_PATH";

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step completed; its mutations may be applied to the run environment
    Succeeded {
        log: String,
        mutations: Vec<EnvMutation>,
    },
    /// Step failed or timed out
    Failed { failure: FailureKind, log: String },
    /// Step was interrupted by cancellation
    Cancelled { log: String },
}

impl StepOutcome {
    pub fn log(&self) -> &str {
        match self {
            StepOutcome::Succeeded { log, .. }
            | StepOutcome::Failed { log, .. }
            | StepOutcome::Cancelled { log } => log,
        }
    }
}

/// Parse `KEY=VALUE` lines written to the env file
pub fn parse_env_file(content: &str) -> Result<Vec<EnvMutation>, String> {
    let mut mutations = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                mutations.push(EnvMutation::set(key.trim(), value));
            }
            _ => {
                return Err(format!(
                    "{} line {}: expected KEY=VALUE, got '{}'",
                    ENV_FILE_VAR,
                    number + 1,
                    line
                ))
            }
        }
    }
    Ok(mutations)
}

/// Parse the path file; every entry is prepended to `PATH` in order
pub fn parse_path_file(content: &str) -> Vec<EnvMutation> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| EnvMutation::prepend_path("PATH", line))
        .collect()
}

/// Executes a single step
pub struct StepExecutor<R> {
    runner: R,
    actions: ActionRegistry,
}

impl<R: CommandRunner> StepExecutor<R> {
    pub fn new(runner: R, actions: ActionRegistry) -> Self {
        Self { runner, actions }
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Execute a step under `env` and return the result
    ///
    /// `env` must already be the step's effective environment.
    pub async fn execute(
        &self,
        step: &Step,
        env: &EnvironmentContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        info!("Executing step: {} ({})", step.id, step.describe());

        if cancel.is_cancelled() {
            return StepOutcome::Cancelled { log: String::new() };
        }

        match &step.kind {
            StepKind::Command { script, shell } => {
                self.execute_command(step, script, shell, env, cancel).await
            }
            StepKind::Action { name, .. } => self.execute_action(step, name, env, cancel).await,
        }
    }

    async fn execute_command(
        &self,
        step: &Step,
        script: &str,
        shell: &Shell,
        env: &EnvironmentContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let scratch = match tempfile::Builder::new().prefix("ci-pipeline-").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("Cannot create scratch directory for step {}: {}", step.id, e);
                return StepOutcome::Failed {
                    failure: FailureKind::Error {
                        message: format!("cannot create scratch directory: {}", e),
                    },
                    log: String::new(),
                };
            }
        };
        let env_file = scratch.path().join("env");
        let path_file = scratch.path().join("path");
        for file in [&env_file, &path_file] {
            if let Err(e) = std::fs::write(file, "") {
                return StepOutcome::Failed {
                    failure: FailureKind::Error {
                        message: format!("cannot create {}: {}", file.display(), e),
                    },
                    log: String::new(),
                };
            }
        }

        let mut vars: BTreeMap<String, String> = env.vars().clone();
        vars.insert(ENV_FILE_VAR.to_string(), env_file.display().to_string());
        vars.insert(PATH_FILE_VAR.to_string(), path_file.display().to_string());

        let (program, args) = shell.command_line(script);
        let request = CommandRequest {
            program,
            args,
            env: vars,
            working_dir: env.working_dir().to_path_buf(),
            timeout: step.timeout,
        };
        debug!("Step {} command: {}", step.id, request.display());

        match self.runner.run(&request, cancel).await {
            Ok(output) if output.success() => {
                let log = output.combined();
                match read_file_commands(&env_file, &path_file) {
                    Ok(mutations) => {
                        info!("Step {} completed successfully", step.id);
                        StepOutcome::Succeeded { log, mutations }
                    }
                    Err(message) => {
                        error!("Step {}: {}", step.id, message);
                        StepOutcome::Failed {
                            failure: FailureKind::Error { message },
                            log,
                        }
                    }
                }
            }
            Ok(output) => {
                warn!("Step {} exited with code {}", step.id, output.exit_code);
                StepOutcome::Failed {
                    failure: FailureKind::ExitCode {
                        code: output.exit_code,
                    },
                    log: output.combined(),
                }
            }
            Err(e) => runner_failure(step, e),
        }
    }

    async fn execute_action(
        &self,
        step: &Step,
        name: &str,
        env: &EnvironmentContext,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let Some(action) = self.actions.get(name) else {
            error!("Step {} uses unknown action {}", step.id, name);
            return StepOutcome::Failed {
                failure: FailureKind::Error {
                    message: format!("unknown action '{}'", name),
                },
                log: String::new(),
            };
        };

        let params = step.render_params(env);
        let ctx = ActionContext {
            step_id: &step.id,
            params: &params,
            env,
            runner: &self.runner,
            cancel,
        };

        let run = action.run(&ctx);
        let result = tokio::select! {
            result = async {
                match step.timeout {
                    Some(limit) => tokio::time::timeout(limit, run)
                        .await
                        .map_err(|_| FailureKind::timed_out(limit)),
                    None => Ok(run.await),
                }
            } => result,
            _ = cancel.cancelled() => {
                info!("Step {} cancelled", step.id);
                return StepOutcome::Cancelled { log: String::new() };
            }
        };

        match result {
            Ok(Ok(output)) => {
                let declared = action.declared_keys(&params);
                if let Some(undeclared) = output
                    .mutations
                    .iter()
                    .find(|m| !declared.iter().any(|k| k == m.key()))
                {
                    error!(
                        "Action {} tried to change undeclared variable {}",
                        name,
                        undeclared.key()
                    );
                    return StepOutcome::Failed {
                        failure: FailureKind::Error {
                            message: format!(
                                "action '{}' changed undeclared variable '{}'",
                                name,
                                undeclared.key()
                            ),
                        },
                        log: output.log,
                    };
                }
                info!("Step {} completed successfully", step.id);
                StepOutcome::Succeeded {
                    log: output.log,
                    mutations: output.mutations,
                }
            }
            Ok(Err(ActionError::Runner(e))) => runner_failure(step, e),
            Ok(Err(e)) => {
                error!("Step {} failed: {}", step.id, e);
                let failure = match &e {
                    ActionError::CommandFailed { code, .. } => FailureKind::ExitCode { code: *code },
                    other => FailureKind::Error {
                        message: other.to_string(),
                    },
                };
                let mut log = e.output().to_string();
                if !log.is_empty() && !log.ends_with('\n') {
                    log.push('\n');
                }
                log.push_str(&e.to_string());
                StepOutcome::Failed { failure, log }
            }
            Err(failure) => {
                error!("Timeout for step {}: {}", step.id, failure);
                StepOutcome::Failed {
                    failure,
                    log: String::new(),
                }
            }
        }
    }
}

/// Map a runner error onto a step outcome
fn runner_failure(step: &Step, error: RunnerError) -> StepOutcome {
    match error {
        RunnerError::Cancelled { output } => {
            info!("Step {} cancelled", step.id);
            StepOutcome::Cancelled { log: output }
        }
        RunnerError::TimedOut { timeout, output } => {
            error!("Timeout for step {} after {}s", step.id, timeout.as_secs());
            StepOutcome::Failed {
                failure: FailureKind::timed_out(timeout),
                log: output,
            }
        }
        other => {
            error!("Step {} could not run: {}", step.id, other);
            StepOutcome::Failed {
                failure: FailureKind::Error {
                    message: other.to_string(),
                },
                log: String::new(),
            }
        }
    }
}

fn read_file_commands(env_file: &Path, path_file: &Path) -> Result<Vec<EnvMutation>, String> {
    let env_content = std::fs::read_to_string(env_file)
        .map_err(|e| format!("cannot read {}: {}", ENV_FILE_VAR, e))?;
    let path_content = std::fs::read_to_string(path_file)
        .map_err(|e| format!("cannot read {}: {}", PATH_FILE_VAR, e))?;

    let mut mutations = parse_env_file(&env_content)?;
    mutations.extend(parse_path_file(&path_content));
    Ok(mutations)
}
