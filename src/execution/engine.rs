//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    actions::ActionRegistry,
    core::{
        ExecutionStatus, FailureKind, Pipeline, RunFailure, RunOutcome, StepState,
        TriggerDecision, TriggerEvent,
    },
    execution::{
        executor::{StepExecutor, StepOutcome},
        runner::CommandRunner,
    },
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    RunSkipped {
        execution_id: Uuid,
        pipeline_name: String,
        reason: String,
    },
    StepStarted {
        step_id: String,
        index: usize,
        total: usize,
        description: String,
    },
    StepOutput {
        step_id: String,
        output: String,
    },
    StepSucceeded {
        step_id: String,
        duration: std::time::Duration,
    },
    StepFailed {
        step_id: String,
        failure: FailureKind,
        tolerated: bool,
    },
    StepSkipped {
        step_id: String,
        reason: String,
    },
    StepCancelled {
        step_id: String,
    },
    RunFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
        failure: Option<RunFailure>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
///
/// The engine holds no per-run state; one engine can drive any number of
/// runs concurrently, each with its own [`Pipeline`].
pub struct ExecutionEngine<R> {
    executor: StepExecutor<R>,
    event_handlers: Vec<EventHandler>,
}

impl<R: CommandRunner> ExecutionEngine<R> {
    /// Engine with the built-in actions
    pub fn new(runner: R) -> Self {
        Self::with_actions(runner, ActionRegistry::with_defaults())
    }

    pub fn with_actions(runner: R, actions: ActionRegistry) -> Self {
        Self {
            executor: StepExecutor::new(runner, actions),
            event_handlers: Vec::new(),
        }
    }

    pub fn actions(&self) -> &ActionRegistry {
        self.executor.actions()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Builder form of [`add_event_handler`](Self::add_event_handler)
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.add_event_handler(handler);
        self
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Gate the run on `event`, then execute it
    ///
    /// A rejected trigger is not an error: every step is marked skipped and
    /// the run ends `Skipped` without touching the environment.
    pub async fn launch(
        &self,
        pipeline: &mut Pipeline,
        event: TriggerEvent,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let decision = pipeline.trigger.evaluate(&event);
        match decision {
            TriggerDecision::Skip { reason } => {
                info!("Pipeline {} skipped: {}", pipeline.name, reason);
                pipeline.event = Some(event);
                pipeline.state.total_steps = pipeline.steps.len();
                pipeline.mark_pending(StepState::Skipped {
                    reason: reason.clone(),
                });
                pipeline.state.skip(reason.clone());
                pipeline.update_counts();
                self.emit_event(ExecutionEvent::RunSkipped {
                    execution_id: pipeline.state.execution_id,
                    pipeline_name: pipeline.name.clone(),
                    reason: reason.clone(),
                });
                RunOutcome::Skipped { reason }
            }
            TriggerDecision::Proceed => {
                pipeline.initialize_env(&event);
                pipeline.event = Some(event);
                self.execute(pipeline, cancel).await
            }
        }
    }

    /// Execute the steps of an already admitted run, in order
    pub async fn execute(&self, pipeline: &mut Pipeline, cancel: &CancellationToken) -> RunOutcome {
        let execution_id = pipeline.state.execution_id;
        let total = pipeline.steps.len();

        info!("Starting pipeline execution: {} ({})", pipeline.name, execution_id);
        pipeline.state.start(total);
        self.emit_event(ExecutionEvent::RunStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: total,
        });

        let mut failure: Option<RunFailure> = None;
        let mut cancelled = false;

        for index in 0..total {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let step = pipeline.steps[index].clone();
            if !step.policy.should_run(failure.is_some()) {
                let reason = match &failure {
                    Some(f) => format!("not run: step '{}' failed", f.step_id),
                    None => "not run".to_string(),
                };
                info!("Skipping step {}: {}", step.id, reason);
                pipeline.steps[index].state = StepState::Skipped {
                    reason: reason.clone(),
                };
                self.emit_event(ExecutionEvent::StepSkipped {
                    step_id: step.id.clone(),
                    reason,
                });
                pipeline.update_counts();
                continue;
            }

            let env = step.effective_env(&pipeline.env);
            let started_at = Utc::now();
            let clock = Instant::now();
            pipeline.steps[index].state = StepState::Running { started_at };
            self.emit_event(ExecutionEvent::StepStarted {
                step_id: step.id.clone(),
                index,
                total,
                description: step.describe(),
            });

            let mut outcome = self.executor.execute(&step, &env, cancel).await;

            // A step killed by cancellation may surface as a failure first
            if let StepOutcome::Failed { log, .. } = &outcome {
                if cancel.is_cancelled() {
                    outcome = StepOutcome::Cancelled { log: log.clone() };
                }
            }

            if !outcome.log().is_empty() {
                self.emit_event(ExecutionEvent::StepOutput {
                    step_id: step.id.clone(),
                    output: outcome.log().to_string(),
                });
            }

            match outcome {
                StepOutcome::Succeeded { log, mutations } => {
                    pipeline.env.apply(&mutations);
                    pipeline.steps[index].state = StepState::Succeeded {
                        log,
                        started_at,
                        completed_at: Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepSucceeded {
                        step_id: step.id.clone(),
                        duration: clock.elapsed(),
                    });
                }
                StepOutcome::Failed { failure: kind, log } => {
                    let tolerated = step.policy.tolerates_failure(failure.is_some());
                    if tolerated {
                        warn!("Step {} failed ({}), continuing", step.id, kind);
                    } else {
                        error!("Step {} failed: {}", step.id, kind);
                    }
                    pipeline.steps[index].state = StepState::Failed {
                        failure: kind.clone(),
                        log,
                        tolerated,
                        started_at,
                        failed_at: Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepFailed {
                        step_id: step.id.clone(),
                        failure: kind.clone(),
                        tolerated,
                    });
                    if !tolerated && failure.is_none() {
                        failure = Some(RunFailure {
                            step_id: step.id.clone(),
                            kind,
                        });
                    }
                }
                StepOutcome::Cancelled { log } => {
                    info!("Step {} interrupted by cancellation", step.id);
                    pipeline.steps[index].state = StepState::Cancelled {
                        log,
                        interrupted: true,
                    };
                    self.emit_event(ExecutionEvent::StepCancelled {
                        step_id: step.id.clone(),
                    });
                    cancelled = true;
                    pipeline.update_counts();
                    break;
                }
            }
            pipeline.update_counts();
        }

        let outcome = if cancelled {
            pipeline.mark_pending(StepState::Cancelled {
                log: String::new(),
                interrupted: false,
            });
            pipeline.state.failure = failure;
            pipeline.state.cancel();
            RunOutcome::Cancelled
        } else if let Some(failure) = failure {
            pipeline.state.fail(failure.clone());
            RunOutcome::Failed(failure)
        } else {
            pipeline.state.succeed();
            RunOutcome::Succeeded
        };
        pipeline.update_counts();

        info!(
            "Pipeline execution finished: {} - {}",
            pipeline.name,
            pipeline.state.status.as_str()
        );
        self.emit_event(ExecutionEvent::RunFinished {
            execution_id,
            status: pipeline.state.status,
            failure: pipeline.state.failure.clone(),
        });

        outcome
    }
}
