//! Test: Reporter - `if: always` steps run after failures and upload coverage

use crate::helpers::*;
use ci_pipeline::core::{ExecutionStatus, RunOutcome};
use std::sync::Arc;

const PIPELINE: &str = r#"
name: "Test: Reporter"
steps:
  - id: build
    run: make
  - id: test
    run: pytest --cov
  - id: docs
    run: make docs
  - id: upload
    uses: upload-coverage@v1
    if: always
"#;

#[tokio::test]
async fn test_reporter_runs_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("build")).unwrap();
    std::fs::write(dir.path().join("build/coverage.xml"), "<coverage/>").unwrap();

    let mut pipeline = pipeline_from_yaml(PIPELINE, dir.path());
    let runner = Arc::new(MockRunner::new().fail("pytest", 1));

    let result = run_manual(&mut pipeline, runner).await;

    // The run keeps the test failure even though the reporter succeeded
    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.outcome.failure().unwrap().step_id, "test");
    assert_step_not_run(&result, "docs");
    assert_step_succeeded(&result, "upload");

    let uploaded = dir.path().join(".pipeline/coverage/build/coverage.xml");
    assert_eq!(std::fs::read_to_string(uploaded).unwrap(), "<coverage/>");
}

#[tokio::test]
async fn test_reporter_failure_on_healthy_run_is_fatal() {
    let yaml = r#"
name: "Test: Strict Reporter"
steps:
  - id: test
    run: pytest --cov
  - id: upload
    uses: upload-coverage
    if: always
    with:
      fail-if-missing: true
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());

    let result = run_manual(&mut pipeline, Arc::new(MockRunner::new())).await;

    assert_eq!(result.status(), ExecutionStatus::Failed);
    assert_eq!(result.outcome.failure().unwrap().step_id, "upload");
    assert_step_failed(&result, "upload", false);
}

#[tokio::test]
async fn test_reporter_failure_after_earlier_failure_keeps_first() {
    let yaml = r#"
name: "Test: First Failure Wins"
steps:
  - id: test
    run: pytest --cov
  - id: upload
    uses: upload-coverage
    if: always
    with:
      fail-if-missing: true
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());
    let runner = Arc::new(MockRunner::new().fail("pytest", 4));

    let result = run_manual(&mut pipeline, runner).await;

    assert!(matches!(result.outcome, RunOutcome::Failed(ref f) if f.step_id == "test"));
    assert_step_failed(&result, "upload", true);
}
