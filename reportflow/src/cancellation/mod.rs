//! Run-level cancellation.
//!
//! A single [`CancellationToken`] is shared by the orchestrator and the stage
//! runner. The CLI cancels it on Ctrl-C.

mod token;

pub use token::CancellationToken;
