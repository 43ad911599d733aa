//! Pipeline building and execution.
//!
//! This module provides:
//! - The validated, ordered [`Pipeline`] and its builder
//! - The [`StageRunner`], which applies timeout, retry and error
//!   classification to one stage
//! - The [`Orchestrator`], which drives a run from first stage to report
//! - Retry delay policies

mod builder;
mod orchestrator;
mod retry;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use builder::{Pipeline, PipelineBuilder};
pub use orchestrator::{Orchestrator, RunInputs};
pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
pub use runner::{StageOutcome, StageRunner};
