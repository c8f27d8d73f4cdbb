use anyhow::{Context, Result};
use ci_pipeline::actions::ActionRegistry;
use ci_pipeline::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use ci_pipeline::cli::output::*;
use ci_pipeline::cli::{Cli, Command};
use ci_pipeline::core::config::PipelineConfig;
use ci_pipeline::core::{EnvironmentContext, ExecutionStatus, Pipeline, RunOutcome};
use ci_pipeline::execution::{ExecutionEngine, ProcessRunner};
use ci_pipeline::persistence::{
    create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Variable overriding the log filter (`RUST_LOG` syntax)
const LOG_ENV_VAR: &str = "CI_PIPELINE_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Open the on-disk execution history
#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    let store = ci_pipeline::persistence::SqliteExecutionStore::with_default_path().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    anyhow::bail!("execution history needs the 'sqlite' feature")
}

fn load_pipeline(cmd: &RunCommand) -> Result<Pipeline> {
    let config = PipelineConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline config {}", cmd.file))?;
    let mut pipeline = config.to_pipeline();
    ActionRegistry::with_defaults().validate(&pipeline)?;

    if cmd.clean_env {
        let mut env = EnvironmentContext::new(pipeline.env.working_dir());
        for key in ["PATH", "HOME"] {
            if let Ok(value) = std::env::var(key) {
                env.set(key, value);
            }
        }
        pipeline = pipeline.with_environment(env);
    }

    if let Some(workdir) = &cmd.workdir {
        let workdir = workdir
            .canonicalize()
            .with_context(|| format!("Invalid working directory {}", workdir.display()))?;
        pipeline.env.set_working_dir(workdir);
    }

    // Apply variable overrides
    for (key, value) in &cmd.env {
        pipeline.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    Ok(pipeline)
}

async fn run_pipeline(cmd: &RunCommand, stream: bool) -> Result<()> {
    let mut pipeline = load_pipeline(cmd)?;
    let event = cmd.trigger_event()?;

    println!(
        "{} Loaded pipeline: {} ({} steps)",
        INFO,
        style(&pipeline.name).bold(),
        pipeline.steps.len()
    );

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    // Set up event handler for console output
    let reporter = Arc::new(ConsoleReporter::new(stream));
    let engine = ExecutionEngine::new(ProcessRunner::new()).on_event({
        let reporter = Arc::clone(&reporter);
        move |event| reporter.handle(&event)
    });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        }
    });

    println!();
    let outcome = engine.launch(&mut pipeline, event, &cancel).await;

    // Save to history
    let summary = create_summary(&pipeline);
    store.save_execution(&summary).await?;
    if !cmd.no_history {
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    // Print final status
    match &outcome {
        RunOutcome::Succeeded => println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        ),
        RunOutcome::Skipped { reason } => println!(
            "\n{} {} skipped: {}",
            SKIP,
            style(&pipeline.name).bold(),
            style(reason).dim()
        ),
        RunOutcome::Failed(failure) => {
            println!(
                "\n{} {} {}: {}",
                CROSS,
                style(&pipeline.name).bold(),
                style("failed").red(),
                failure
            );
            let log = pipeline
                .step(&failure.step_id)
                .and_then(|step| step.state.log())
                .unwrap_or_default();
            if let Some(excerpt) = reporter.failure_excerpt(log) {
                println!("{}", excerpt);
            }
        }
        RunOutcome::Cancelled => println!(
            "\n{} {} {}",
            WARN,
            style(&pipeline.name).bold(),
            style("was cancelled").yellow()
        ),
    }

    if !outcome.is_success() {
        if let Some(failure) = outcome.failure() {
            error!("{}", failure);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        ActionRegistry::with_defaults().validate(&config.to_pipeline())?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Variables: {}", style(config.variables().len()).cyan());
            match &config.triggers.labeled {
                Some(labeled) => println!(
                    "  Triggers: manual, label {} from {}",
                    style(&labeled.label).cyan(),
                    style(&labeled.owner).cyan()
                ),
                None => println!("  Triggers: manual"),
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    let mut counts = Vec::new();
    for pipeline_name in &pipelines {
        let executions = store.list_executions(pipeline_name).await?;
        let count = |status: ExecutionStatus| executions.iter().filter(|e| e.status == status).count();
        counts.push((
            pipeline_name,
            executions.len(),
            count(ExecutionStatus::Succeeded),
            count(ExecutionStatus::Failed),
            count(ExecutionStatus::Skipped),
        ));
    }

    if cmd.json {
        let json_data: Vec<_> = counts
            .iter()
            .map(|(name, total, succeeded, failed, skipped)| {
                serde_json::json!({
                    "name": name,
                    "execution_count": total,
                    "succeeded": succeeded,
                    "failed": failed,
                    "skipped": skipped,
                })
            })
            .collect();
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for (name, total, succeeded, failed, skipped) in &counts {
        if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} skipped)",
                style(name).bold(),
                style(total).cyan(),
                style(succeeded).green(),
                style(failed).red(),
                style(skipped).dim()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_execution(exec_id).await? {
            Some(summary) if cmd.json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Some(summary) => print_execution_details(&summary, cmd.verbose),
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    // List executions for pipeline or all
    let mut executions = if let Some(pipeline_name) = &cmd.pipeline {
        store.list_executions(pipeline_name).await?
    } else {
        let mut all_execs = Vec::new();
        for pipeline in store.list_pipelines().await? {
            all_execs.extend(store.list_executions(&pipeline).await?);
        }
        all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_execs
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if cmd.verbose {
            print_steps(summary, false);
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    if let Some(trigger) = summary.trigger {
        let mut origin = trigger.as_str().to_string();
        if let Some(label) = &summary.label {
            origin.push_str(&format!(" '{}'", label));
        }
        if let Some(owner) = summary.repository_owner.as_deref().filter(|o| !o.is_empty()) {
            origin.push_str(&format!(" by {}", owner));
        }
        println!("  Trigger: {}", style(origin).dim());
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({} succeeded, {} failed, {} skipped of {})",
        style(format!("{:.0}%", summary.progress * 100.0)).cyan(),
        summary.succeeded_steps,
        summary.failed_steps,
        summary.skipped_steps,
        summary.total_steps
    );
    if let (Some(step), Some(reason)) = (&summary.failed_step, &summary.failure_reason) {
        println!("  Failed step: {} ({})", style(step).red(), reason);
    }
    if let Some(reason) = &summary.skip_reason {
        println!("  Skipped: {}", style(reason).dim());
    }

    print_steps(summary, verbose);
}

fn print_steps(summary: &ExecutionSummary, with_logs: bool) {
    for step in &summary.steps {
        let code = step
            .exit_code
            .map(|code| format!(" (exit code {})", code))
            .unwrap_or_default();
        println!("    {} {}{}", style(&step.id).bold(), style(&step.status).dim(), code);
        if with_logs && !step.log.trim().is_empty() {
            for line in step.log.lines() {
                println!("      {}", line);
            }
        }
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
