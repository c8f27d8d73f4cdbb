//! Test: Cancellation - interrupts the running step and ends the run as cancelled

use crate::helpers::*;
use ci_pipeline::core::{ExecutionStatus, RunOutcome, StepState, TriggerEvent};
use ci_pipeline::execution::ExecutionEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PIPELINE: &str = r#"
name: "Test: Cancellation"
steps:
  - id: build
    run: make
  - id: test
    run: pytest --slow
  - id: upload
    uses: upload-coverage
    if: always
"#;

#[tokio::test]
async fn test_cancel_during_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new().respond("pytest --slow", Scripted::Hang));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = run_with(
        &mut pipeline,
        runner.clone(),
        TriggerEvent::manual("deepmodeling"),
        &cancel,
    )
    .await;

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert_eq!(result.status(), ExecutionStatus::Cancelled);
    assert_step_succeeded(&result, "build");

    // The interrupted step is cancelled, not failed
    assert!(matches!(
        result.step_state("test"),
        StepState::Cancelled { interrupted: true, .. }
    ));
    assert!(result.pipeline.state.failure.is_none());

    // Nothing after it runs, not even an `if: always` step
    assert!(matches!(
        result.step_state("upload"),
        StepState::Cancelled { interrupted: false, .. }
    ));
    assert_eq!(runner.commands().len(), 2);

    assert!(!result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepFailed { .. })));
    assert!(result.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepCancelled { step_id } if step_id == "test"
    )));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_with(
        &mut pipeline,
        runner.clone(),
        TriggerEvent::manual("deepmodeling"),
        &cancel,
    )
    .await;

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert!(runner.commands().is_empty());
    assert!(result.executed().is_empty());
}

#[tokio::test]
async fn test_cancel_after_failure_reports_cancelled() {
    let yaml = r#"
name: "Test: Cancel After Failure"
steps:
  - id: lint
    run: lint
    continue_on_error: false
  - id: upload
    run: upload --slow
    if: always
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());
    let runner = Arc::new(
        MockRunner::new()
            .fail("lint", 1)
            .respond("upload --slow", Scripted::Hang),
    );
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = run_with(
        &mut pipeline,
        runner,
        TriggerEvent::manual("deepmodeling"),
        &cancel,
    )
    .await;

    // Cancellation takes priority; the earlier failure stays on record
    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert_eq!(result.pipeline.state.failure.as_ref().unwrap().step_id, "lint");
}
