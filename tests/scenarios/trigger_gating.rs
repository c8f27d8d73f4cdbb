//! Test: Trigger gating - labeled events only start runs for the watched label and owner

use crate::helpers::*;
use ci_pipeline::core::{ExecutionStatus, RunOutcome, StepState, TriggerEvent};
use ci_pipeline::execution::ExecutionEvent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PIPELINE: &str = r#"
name: "Test CUDA"
on:
  labeled:
    label: "Test CUDA"
    owner: deepmodeling
steps:
  - id: build
    run: pip install .
  - id: test
    run: pytest
"#;

async fn run_event(event: TriggerEvent) -> (PipelineTestResult, Arc<MockRunner>) {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new());
    let result = run_with(&mut pipeline, runner.clone(), event, &CancellationToken::new()).await;
    (result, runner)
}

#[tokio::test]
async fn test_matching_label_runs() {
    let (result, runner) = run_event(TriggerEvent::labeled("deepmodeling", "Test CUDA")).await;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(runner.commands().len(), 2);
    assert_eq!(
        runner.env_of("pytest").unwrap().env["PIPELINE_LABEL"],
        "Test CUDA"
    );
}

#[tokio::test]
async fn test_other_label_is_skipped() {
    let (result, runner) = run_event(TriggerEvent::labeled("deepmodeling", "docs")).await;

    assert!(matches!(result.outcome, RunOutcome::Skipped { .. }));
    assert_eq!(result.status(), ExecutionStatus::Skipped);
    assert!(result.outcome.is_success());
    assert!(runner.commands().is_empty());
    assert!(result
        .pipeline
        .steps
        .iter()
        .all(|s| matches!(s.state, StepState::Skipped { .. })));
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::RunSkipped { .. })));

    // The environment is never initialized for a skipped run
    assert!(!result.pipeline.env.contains("PIPELINE_RUN_ID"));
}

#[tokio::test]
async fn test_fork_owner_is_skipped() {
    let (result, runner) = run_event(TriggerEvent::labeled("someone-else", "Test CUDA")).await;

    match &result.outcome {
        RunOutcome::Skipped { reason } => assert!(reason.contains("trigger condition not met")),
        other => panic!("expected skip, got {:?}", other),
    }
    assert!(runner.commands().is_empty());
    assert_eq!(
        result.pipeline.state.skip_reason.as_deref(),
        Some("trigger condition not met")
    );
}

#[tokio::test]
async fn test_manual_dispatch_always_runs() {
    let (result, runner) = run_event(TriggerEvent::manual("someone-else")).await;

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(runner.commands().len(), 2);
}
