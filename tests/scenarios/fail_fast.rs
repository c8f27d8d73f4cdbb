//! Test: Fail-fast - the first fatal failure stops the run

use crate::helpers::*;
use ci_pipeline::core::{ExecutionStatus, FailureKind, RunFailure, RunOutcome, StepState};
use std::sync::Arc;

const PIPELINE: &str = r#"
name: "Test: Fail Fast"
steps:
  - id: build
    run: make build
  - id: test
    run: make test
  - id: package
    run: make package
"#;

#[tokio::test]
async fn test_all_steps_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new());

    let result = run_manual(&mut pipeline, runner.clone()).await;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(result.status(), ExecutionStatus::Succeeded);
    assert_eq!(result.executed(), vec!["build", "test", "package"]);
    assert_eq!(runner.commands().len(), 3);
    assert_eq!(result.pipeline.state.succeeded_steps, 3);
}

#[tokio::test]
async fn test_failure_stops_remaining_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new().fail("make test", 2));

    let result = run_manual(&mut pipeline, runner.clone()).await;

    assert_eq!(
        result.outcome,
        RunOutcome::Failed(RunFailure {
            step_id: "test".to_string(),
            kind: FailureKind::ExitCode { code: 2 },
        })
    );
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_step_succeeded(&result, "build");
    assert_step_failed(&result, "test", false);
    assert_step_not_run(&result, "package");

    // package never reached the runner
    let commands = runner.commands();
    assert_eq!(commands.len(), 2);
    assert!(!commands.iter().any(|c| c.contains("make package")));

    match result.step_state("package") {
        StepState::Skipped { reason } => assert!(reason.contains("'test'"), "{}", reason),
        other => panic!("package should be skipped, was {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_step_log_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new().fail("make build", 1));

    let result = run_manual(&mut pipeline, runner).await;

    assert_eq!(result.pipeline.state.failure.as_ref().unwrap().step_id, "build");
    let log = result.step_state("build").log().unwrap();
    assert!(log.contains("make build: exit 1"), "{}", log);
    assert_eq!(result.pipeline.state.skipped_steps, 2);
}
