//! Test: Continue on error - tolerated failures are recorded but do not stop the run

use crate::helpers::*;
use ci_pipeline::core::{ExecutionStatus, RunOutcome};
use ci_pipeline::execution::ExecutionEvent;
use std::sync::Arc;

const PIPELINE: &str = r#"
name: "Test: Continue On Error"
steps:
  - id: lint
    run: ruff check .
  - id: flaky
    run: pytest tests/flaky
    continue_on_error: true
  - id: test
    run: pytest tests
"#;

#[tokio::test]
async fn test_tolerated_failure_keeps_run_green() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new().fail("tests/flaky", 1));

    let result = run_manual(&mut pipeline, runner.clone()).await;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(result.executed(), vec!["lint", "flaky", "test"]);
    assert_step_failed(&result, "flaky", true);
    assert_step_succeeded(&result, "test");
    assert!(result.pipeline.state.failure.is_none());
    assert_eq!(result.pipeline.state.failed_steps, 1);

    assert!(result.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step_id, tolerated: true, .. } if step_id == "flaky"
    )));
}

#[tokio::test]
async fn test_fatal_failure_after_tolerated_one() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new().fail("tests/flaky", 1).fail("pytest tests", 3));

    let result = run_manual(&mut pipeline, runner).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_step_failed(&result, "flaky", true);
    assert_step_failed(&result, "test", false);
    assert_eq!(result.outcome.failure().unwrap().step_id, "test");
}

#[tokio::test]
async fn test_tolerated_failure_log_is_recorded() {
    let yaml = r#"
name: "Test: Failed Step Env"
steps:
  - id: probe
    run: probe-gpu
    continue_on_error: true
  - id: after
    run: echo after
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());
    let runner = Arc::new(MockRunner::new().respond(
        "probe-gpu",
        Scripted::Exit {
            code: 1,
            output: "no GPU\n".to_string(),
        },
    ));

    let result = run_manual(&mut pipeline, runner).await;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_step_failed(&result, "probe", true);
    assert_eq!(result.step_state("probe").log(), Some("no GPU\n"));
    assert_step_succeeded(&result, "after");
}
