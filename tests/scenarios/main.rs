//! Scenario-based tests for ci-pipeline

mod helpers;

mod cancellation;
mod concurrent_runs;
mod continue_on_error;
mod environment;
mod fail_fast;
mod processes;
mod reporter;
mod trigger_gating;
