//! Lifecycle events emitted while a run executes.
//!
//! Every event carries a JSON payload with at least `run_id`; stage events
//! add `stage`, and the payload of terminal events mirrors the record that
//! lands in the execution report.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run was claimed and is about to execute its first stage.
pub const RUN_STARTED: &str = "run.started";
/// A stage became due and its first attempt is starting.
pub const STAGE_STARTED: &str = "stage.started";
/// An attempt failed transiently and another attempt will follow.
pub const STAGE_RETRYING: &str = "stage.retrying";
/// A stage wrote all of its declared outputs.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage exhausted its budget or failed permanently.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was not attempted.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// A stage was interrupted by cancellation.
pub const STAGE_CANCELLED: &str = "stage.cancelled";
/// The run reached a terminal status.
pub const RUN_COMPLETED: &str = "run.completed";
