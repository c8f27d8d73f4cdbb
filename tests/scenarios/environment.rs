//! Test: Environment - provisioners and file commands affect only later steps

use crate::helpers::*;
use ci_pipeline::core::RunOutcome;
use ci_pipeline::core::PATH_LIST_SEPARATOR;
use std::path::Path;
use std::sync::Arc;

fn path_entries(path: &str) -> Vec<&str> {
    path.split(PATH_LIST_SEPARATOR).collect()
}

fn tool_prefix(root: &Path) -> std::path::PathBuf {
    let prefix = root.join("opt/tool");
    write_executable(&prefix.join("bin/mytool"), "#!/bin/sh\necho mytool 1.0\n");
    prefix
}

#[cfg(unix)]
#[tokio::test]
async fn test_provisioned_path_visible_only_to_later_steps() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = tool_prefix(dir.path());
    let bin = prefix.join("bin").display().to_string();
    let yaml = format!(
        r#"
name: "Test: Provisioning"
steps:
  - id: before
    run: echo before
  - id: setup
    uses: setup-tool
    with:
      binary: mytool
      prefix: {}
      home-var: MYTOOL_HOME
  - id: after
    run: mytool --version
"#,
        prefix.display()
    );
    let mut pipeline = pipeline_from_yaml(&yaml, dir.path());
    let runner = Arc::new(MockRunner::new());

    let result = run_manual(&mut pipeline, runner.clone()).await;
    assert_eq!(result.outcome, RunOutcome::Succeeded, "{}", result.summary());

    let before = runner.env_of("echo before").unwrap();
    let before_path = before.env.get("PATH").cloned().unwrap_or_default();
    assert!(!path_entries(&before_path).contains(&bin.as_str()));
    assert!(!before.env.contains_key("MYTOOL_HOME"));

    let after = runner.env_of("mytool --version").unwrap();
    assert_eq!(path_entries(&after.env["PATH"])[0], bin);
    assert_eq!(after.env["MYTOOL_HOME"], prefix.display().to_string());

    // The earlier entries are kept, in order, behind the new one
    assert_eq!(&path_entries(&after.env["PATH"])[1..], path_entries(&before_path).as_slice());
}

#[cfg(unix)]
#[tokio::test]
async fn test_repeated_provisioning_keeps_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = tool_prefix(dir.path());
    let bin = prefix.join("bin").display().to_string();
    let yaml = format!(
        r#"
name: "Test: Provision Twice"
steps:
  - id: first
    uses: setup-tool
    with: {{ binary: mytool, prefix: "{0}" }}
  - id: second
    uses: setup-tool
    with: {{ binary: mytool, prefix: "{0}" }}
"#,
        prefix.display()
    );
    let mut pipeline = pipeline_from_yaml(&yaml, dir.path());

    let result = run_manual(&mut pipeline, Arc::new(MockRunner::new())).await;

    assert_eq!(result.outcome, RunOutcome::Succeeded, "{}", result.summary());
    let entries = result.pipeline.env.path_entries("PATH");
    assert_eq!(&entries[..2], &[bin.as_str(), bin.as_str()]);
}

#[tokio::test]
async fn test_step_overlay_does_not_leak() {
    let yaml = r#"
name: "Test: Overlay"
env:
  DP_VARIANT: cpu
steps:
  - id: gpu
    run: build gpu
    env:
      DP_VARIANT: cuda
      CUDA_VISIBLE_DEVICES: "0"
  - id: cpu
    run: build cpu
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());
    let runner = Arc::new(MockRunner::new());

    run_manual(&mut pipeline, runner.clone()).await;

    let gpu = runner.env_of("build gpu").unwrap();
    assert_eq!(gpu.env["DP_VARIANT"], "cuda");
    assert_eq!(gpu.env["CUDA_VISIBLE_DEVICES"], "0");

    let cpu = runner.env_of("build cpu").unwrap();
    assert_eq!(cpu.env["DP_VARIANT"], "cpu");
    assert!(!cpu.env.contains_key("CUDA_VISIBLE_DEVICES"));
    assert_eq!(pipeline.env.get("DP_VARIANT"), "cpu");
}

#[tokio::test]
async fn test_env_file_commands_reach_later_steps() {
    let yaml = r#"
name: "Test: Env File"
steps:
  - id: configure
    run: configure
  - id: build
    run: build
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());
    let runner = Arc::new(MockRunner::new().respond(
        "configure",
        Scripted::WriteEnv {
            lines: "CMAKE_PREFIX_PATH=/opt/deps\n# comment\n\nTF_CPP_MIN_LOG_LEVEL=3\n".to_string(),
        },
    ));

    let result = run_manual(&mut pipeline, runner.clone()).await;
    assert_eq!(result.outcome, RunOutcome::Succeeded, "{}", result.summary());

    let configure = runner.env_of("configure").unwrap();
    assert!(!configure.env.contains_key("CMAKE_PREFIX_PATH"));

    let build = runner.env_of("build").unwrap();
    assert_eq!(build.env["CMAKE_PREFIX_PATH"], "/opt/deps");
    assert_eq!(build.env["TF_CPP_MIN_LOG_LEVEL"], "3");
}

#[tokio::test]
async fn test_run_variables_are_seeded() {
    let yaml = r#"
name: "Test: Run Variables"
steps:
  - id: show
    run: env
"#;
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(yaml, dir.path());
    let runner = Arc::new(MockRunner::new());

    run_manual(&mut pipeline, runner.clone()).await;

    let request = runner.env_of("env").unwrap();
    assert_eq!(request.env["CI"], "true");
    assert_eq!(request.env["PIPELINE_EVENT"], "manual");
    assert_eq!(request.env["PIPELINE_REPOSITORY_OWNER"], "deepmodeling");
    assert_eq!(request.working_dir, dir.path());
}
