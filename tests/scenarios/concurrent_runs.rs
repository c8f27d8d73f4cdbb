//! Test: Concurrent runs - one engine drives independent runs that share nothing

use crate::helpers::*;
use ci_pipeline::core::{RunOutcome, TriggerEvent};
use ci_pipeline::execution::ExecutionEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn variant_pipeline(variant: &str, dir: &std::path::Path) -> ci_pipeline::core::Pipeline {
    let yaml = format!(
        r#"
name: "Test: Variant {0}"
steps:
  - id: configure
    run: configure-{0}
  - id: build
    run: build-{0}
"#,
        variant
    );
    pipeline_from_yaml(&yaml, dir)
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_environment() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut cpu = variant_pipeline("cpu", dir_a.path());
    let mut cuda = variant_pipeline("cuda", dir_b.path());

    let runner = Arc::new(
        MockRunner::new()
            .respond(
                "configure-cpu",
                Scripted::WriteEnv {
                    lines: "DP_VARIANT=cpu\n".to_string(),
                },
            )
            .respond(
                "configure-cuda",
                Scripted::WriteEnv {
                    lines: "DP_VARIANT=cuda\nCUDA_HOME=/usr/local/cuda\n".to_string(),
                },
            ),
    );
    let engine = ExecutionEngine::new(runner.clone());
    let cancel = CancellationToken::new();

    let (cpu_outcome, cuda_outcome) = tokio::join!(
        engine.launch(&mut cpu, TriggerEvent::manual("deepmodeling"), &cancel),
        engine.launch(&mut cuda, TriggerEvent::manual("deepmodeling"), &cancel),
    );

    assert_eq!(cpu_outcome, RunOutcome::Succeeded);
    assert_eq!(cuda_outcome, RunOutcome::Succeeded);
    assert_ne!(cpu.state.execution_id, cuda.state.execution_id);

    assert_eq!(cpu.env.get("DP_VARIANT"), "cpu");
    assert!(!cpu.env.contains("CUDA_HOME"));
    assert_eq!(cuda.env.get("DP_VARIANT"), "cuda");
    assert_eq!(cuda.env.get("CUDA_HOME"), "/usr/local/cuda");

    let cpu_build = runner.env_of("build-cpu").unwrap();
    assert_eq!(cpu_build.env["DP_VARIANT"], "cpu");
    assert!(!cpu_build.env.contains_key("CUDA_HOME"));
    assert_eq!(cpu_build.working_dir, dir_a.path());
}
