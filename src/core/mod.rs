//! Core domain models for Pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, trigger events and the shared run environment.

pub mod config;
pub mod environment;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod trigger;

pub use environment::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
