//! CLI output formatting

use crate::{
    core::{ExecutionStatus, StepState},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a spinner for a running step
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        StepState::Failed {
            tolerated: true, ..
        } => style("FAILED (continued)").yellow().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
        StepState::Cancelled { .. } => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Skipped => style("SKIPPED").dim().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Skipped => SKIP,
        _ => INFO,
    };

    let detail = match (&summary.failed_step, &summary.failure_reason, &summary.skip_reason) {
        (Some(step), Some(reason), _) => format!(" - {} ({})", style(step).red(), reason),
        (_, _, Some(reason)) => format!(" - {}", style(reason).dim()),
        _ => String::new(),
    };

    format!(
        "{} {} - {} - {} ({}/{}){}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_steps,
        summary.total_steps,
        detail
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            execution_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(execution_id)).dim(),
            total_steps
        ),
        ExecutionEvent::RunSkipped {
            pipeline_name,
            reason,
            ..
        } => format!(
            "{} Pipeline {} skipped: {}",
            SKIP,
            style(pipeline_name).bold(),
            style(reason).dim()
        ),
        ExecutionEvent::StepStarted {
            step_id,
            index,
            total,
            description,
        } => format!(
            "{} [{}/{}] {} {}",
            SPINNER,
            index + 1,
            total,
            style(step_id).cyan(),
            style(description).dim()
        ),
        ExecutionEvent::StepOutput { step_id, output } => {
            format!("{} Output from {}:\n{}", INFO, style(step_id).dim(), output)
        }
        ExecutionEvent::StepSucceeded { step_id, duration } => format!(
            "{} {} {}",
            CHECK,
            style(step_id).green(),
            style(format!("({:.1}s)", duration.as_secs_f64())).dim()
        ),
        ExecutionEvent::StepFailed {
            step_id,
            failure,
            tolerated,
        } => {
            if *tolerated {
                format!(
                    "{} {}: {} {}",
                    WARN,
                    style(step_id).yellow(),
                    failure,
                    style("(continuing)").dim()
                )
            } else {
                format!("{} {}: {}", CROSS, style(step_id).red(), style(failure).dim())
            }
        }
        ExecutionEvent::StepSkipped { step_id, reason } => {
            format!("{} {} {}", SKIP, style(step_id).dim(), style(reason).dim())
        }
        ExecutionEvent::StepCancelled { step_id } => {
            format!("{} {} cancelled", WARN, style(step_id).yellow())
        }
        ExecutionEvent::RunFinished {
            execution_id,
            status,
            failure,
        } => {
            let status_str = match (status, failure) {
                (ExecutionStatus::Succeeded, _) => {
                    format!("{} completed", style("successfully").green())
                }
                (ExecutionStatus::Failed, Some(failure)) => {
                    format!("{}: {}", style("failed").red(), failure)
                }
                (ExecutionStatus::Cancelled, _) => style("was cancelled").yellow().to_string(),
                (other, _) => format_status(*other),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(short_id(execution_id)).dim(),
                status_str
            )
        }
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}\n{}",
            style(format!("[... {} earlier lines]", lines.len() - max_lines)).dim(),
            tail
        )
    }
}

/// Renders engine events to the terminal, with a spinner for the running step
pub struct ConsoleReporter {
    stream: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    /// Lines of step output shown with `--stream`
    const STREAM_LINES: usize = 40;

    /// Lines of output shown for a failing step without `--stream`
    const FAILURE_LINES: usize = 20;

    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            spinner: Mutex::new(None),
        }
    }

    fn stop_spinner(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(spinner) = spinner.take() {
                spinner.finish_and_clear();
            }
        }
    }

    pub fn handle(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::StepStarted { step_id, .. } => {
                println!("{}", format_execution_event(event));
                if let Ok(mut spinner) = self.spinner.lock() {
                    *spinner = Some(create_spinner(format!("running {}", step_id)));
                }
            }
            ExecutionEvent::StepOutput { output, .. } => {
                self.stop_spinner();
                if self.stream {
                    println!("{}", format_output(output, Self::STREAM_LINES));
                }
            }
            _ => {
                self.stop_spinner();
                println!("{}", format_execution_event(event));
            }
        }
    }

    /// Tail of a failing step's log, for non-streaming output
    pub fn failure_excerpt(&self, log: &str) -> Option<String> {
        if self.stream || log.trim().is_empty() {
            None
        } else {
            Some(format_output(log.trim_end(), Self::FAILURE_LINES))
        }
    }
}
