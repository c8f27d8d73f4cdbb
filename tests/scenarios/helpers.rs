//! Test utilities for pipeline scenarios

use async_trait::async_trait;
use ci_pipeline::core::config::PipelineConfig;
use ci_pipeline::core::{ExecutionStatus, Pipeline, RunOutcome, StepState, TriggerEvent};
use ci_pipeline::execution::{
    CommandOutput, CommandRequest, CommandRunner, ExecutionEngine, ExecutionEvent, RunnerError,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the mock does when a script matches
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit with `code`, printing `output`
    Exit { code: i32, output: String },
    /// Append `lines` to the step's `PIPELINE_ENV` file, then succeed
    WriteEnv { lines: String },
    /// Block until the run is cancelled
    Hang,
}

/// Command runner answering from a script table instead of spawning processes
///
/// Rules are matched in order against the full command line; commands that
/// match no rule succeed silently.
#[derive(Default)]
pub struct MockRunner {
    rules: Vec<(String, Scripted)>,
    requests: Mutex<Vec<CommandRequest>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail commands containing `pattern` with `code`
    pub fn fail(mut self, pattern: &str, code: i32) -> Self {
        self.rules.push((
            pattern.to_string(),
            Scripted::Exit {
                code,
                output: format!("{}: exit {}\n", pattern, code),
            },
        ));
        self
    }

    pub fn respond(mut self, pattern: &str, response: Scripted) -> Self {
        self.rules.push((pattern.to_string(), response));
        self
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Command lines seen so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.requests().iter().map(CommandRequest::display).collect()
    }

    /// Environment the command containing `pattern` ran with
    pub fn env_of(&self, pattern: &str) -> Option<CommandRequest> {
        self.requests()
            .into_iter()
            .find(|r| r.display().contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        request: &CommandRequest,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, RunnerError> {
        self.requests.lock().unwrap().push(request.clone());

        let line = request.display();
        let response = self
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());

        let (exit_code, stdout) = match response {
            None => (0, String::new()),
            Some(Scripted::Exit { code, output }) => (code, output),
            Some(Scripted::WriteEnv { lines }) => {
                let file = request
                    .env
                    .get("PIPELINE_ENV")
                    .expect("command steps get an env file");
                std::fs::write(file, lines).unwrap();
                (0, String::new())
            }
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                return Err(RunnerError::Cancelled {
                    output: "interrupted\n".to_string(),
                });
            }
        };

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr: String::new(),
            duration: Duration::from_millis(1),
        })
    }
}

/// Result of running a pipeline in a test
#[derive(Debug, Clone)]
pub struct PipelineTestResult {
    pub pipeline: Pipeline,
    pub outcome: RunOutcome,
    pub events: Vec<ExecutionEvent>,
}

impl PipelineTestResult {
    pub fn status(&self) -> ExecutionStatus {
        self.pipeline.state.status
    }

    pub fn step_state(&self, step_id: &str) -> &StepState {
        &self
            .pipeline
            .step(step_id)
            .unwrap_or_else(|| panic!("Step '{}' not found in result", step_id))
            .state
    }

    /// Ids of the steps that ran, in order
    pub fn executed(&self) -> Vec<&str> {
        self.pipeline.executed_steps()
    }

    pub fn summary(&self) -> String {
        format!(
            "{:?} - steps: {:?}",
            self.status(),
            self.pipeline
                .steps
                .iter()
                .map(|s| format!("{}={}", s.id, s.state.label()))
                .collect::<Vec<_>>()
        )
    }
}

/// Parse a pipeline from YAML, rooted at `workdir`
pub fn pipeline_from_yaml(yaml: &str, workdir: &Path) -> Pipeline {
    let config = PipelineConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e));
    let mut pipeline = config.to_pipeline();
    pipeline.env.set_working_dir(workdir);
    pipeline
}

/// Run a pipeline through the engine with the given runner and event
pub async fn run_with<R: CommandRunner + 'static>(
    pipeline: &mut Pipeline,
    runner: R,
    event: TriggerEvent,
    cancel: &CancellationToken,
) -> PipelineTestResult {
    let events = Arc::new(Mutex::new(Vec::new()));
    let engine = ExecutionEngine::new(runner).on_event({
        let events = Arc::clone(&events);
        move |event| events.lock().unwrap().push(event)
    });

    let outcome = engine.launch(pipeline, event, cancel).await;
    let events = events.lock().unwrap().clone();

    PipelineTestResult {
        pipeline: pipeline.clone(),
        outcome,
        events,
    }
}

/// Run a manually dispatched pipeline with a shared mock runner
pub async fn run_manual(pipeline: &mut Pipeline, runner: Arc<MockRunner>) -> PipelineTestResult {
    run_with(
        pipeline,
        runner,
        TriggerEvent::manual("deepmodeling"),
        &CancellationToken::new(),
    )
    .await
}

/// Assert the step ran and succeeded
pub fn assert_step_succeeded(result: &PipelineTestResult, step_id: &str) {
    assert!(
        matches!(result.step_state(step_id), StepState::Succeeded { .. }),
        "Step '{}' should have succeeded: {}",
        step_id,
        result.summary()
    );
}

/// Assert the step failed, tolerated or not
pub fn assert_step_failed(result: &PipelineTestResult, step_id: &str, tolerated: bool) {
    match result.step_state(step_id) {
        StepState::Failed { tolerated: t, .. } => assert_eq!(
            *t, tolerated,
            "Step '{}' tolerated flag: {}",
            step_id,
            result.summary()
        ),
        _ => panic!("Step '{}' should have failed: {}", step_id, result.summary()),
    }
}

/// Assert the step never started
pub fn assert_step_not_run(result: &PipelineTestResult, step_id: &str) {
    assert!(
        !result.step_state(step_id).was_executed(),
        "Step '{}' should not have run: {}",
        step_id,
        result.summary()
    );
}

/// Write an executable script, creating parent directories
pub fn write_executable(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
