//! Test: Real processes - file commands, timeouts and the demo pipeline

use crate::helpers::*;
use ci_pipeline::actions::ActionRegistry;
use ci_pipeline::core::config::PipelineConfig;
use ci_pipeline::core::{FailureKind, RunOutcome, StepState, TriggerEvent};
use ci_pipeline::execution::ProcessRunner;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
#[tokio::test]
async fn test_file_commands_with_real_shell() {
    let yaml = r#"
name: "Test: File Commands"
steps:
  - id: export
    shell: sh
    run: |
      echo "GREETING=hello" >> "$PIPELINE_ENV"
      mkdir -p tools/bin
      printf '#!/bin/sh\necho tool-ok\n' > tools/bin/mytool
      chmod +x tools/bin/mytool
      echo "$(pwd)/tools/bin" >> "$PIPELINE_PATH"
  - id: use
    shell: sh
    run: |
      test "$GREETING" = hello
      mytool
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());

    let result = run_with(
        &mut pipeline,
        ProcessRunner::new(),
        TriggerEvent::manual("deepmodeling"),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.outcome, RunOutcome::Succeeded, "{}", result.summary());
    assert_eq!(result.step_state("use").log(), Some("tool-ok\n"));
    assert_eq!(result.pipeline.env.get("GREETING"), "hello");
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_is_a_failure() {
    let yaml = r#"
name: "Test: Timeout"
steps:
  - id: hang
    shell: sh
    run: sleep 30
    timeout_secs: 1
  - id: never
    shell: sh
    run: "true"
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());

    let result = run_with(
        &mut pipeline,
        ProcessRunner::new(),
        TriggerEvent::manual("deepmodeling"),
        &CancellationToken::new(),
    )
    .await;

    let failure = result.outcome.failure().unwrap();
    assert_eq!(failure.step_id, "hang");
    assert!(matches!(failure.kind, FailureKind::TimedOut { .. }));
    assert_step_not_run(&result, "never");
    assert!(matches!(result.step_state("never"), StepState::Skipped { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_tolerated_timeout_continues() {
    let yaml = r#"
name: "Test: Tolerated Timeout"
steps:
  - id: slow
    shell: sh
    run: sleep 30 & sleep 30
    timeout_secs: 1
    continue_on_error: true
  - id: after
    shell: sh
    run: "true"
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());

    let start = std::time::Instant::now();
    let result = run_with(
        &mut pipeline,
        ProcessRunner::new(),
        TriggerEvent::manual("deepmodeling"),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.outcome, RunOutcome::Succeeded, "{}", result.summary());
    assert!(start.elapsed() < std::time::Duration::from_secs(10));
    match result.step_state("slow") {
        StepState::Failed {
            failure, tolerated, ..
        } => {
            assert_eq!(*failure, FailureKind::TimedOut { secs: 1 });
            assert!(*tolerated);
        }
        other => panic!("slow should have timed out: {:?}", other),
    }
    assert_step_succeeded(&result, "after");
}

#[test]
fn test_demo_pipeline_is_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/test_cuda.yml");
    let config = PipelineConfig::from_file(&path).unwrap();
    let pipeline = config.to_pipeline();

    ActionRegistry::with_defaults().validate(&pipeline).unwrap();
    assert_eq!(pipeline.trigger.watch_label.as_deref(), Some("Test CUDA"));
    assert_eq!(pipeline.trigger.allowed_owner.as_deref(), Some("deepmodeling"));
    assert_eq!(pipeline.steps.last().unwrap().id, "upload-coverage");
}
