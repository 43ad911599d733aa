//! Stage definitions and the collaborator contract.
//!
//! A stage is a statically declared step: named inputs, named outputs and
//! one [`Collaborator`] that turns the former into the latter. The
//! collaborator is the only part that talks to the outside world
//! (OCR tool, LLM, typesetter); everything around it is orchestration.

mod definition;
mod ports;

pub use definition::{StageDefinition, DEFAULT_MAX_RETRIES, DEFAULT_STAGE_TIMEOUT};
pub use ports::{StageInputs, StageProducts};

use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::fmt::Debug;

/// An external service or toolchain invoked by a stage.
///
/// Implementations either return a payload for every output the stage
/// declares, or fail with a [`CollaboratorError`] classifying the failure as
/// transient or permanent. They must not keep state between calls that
/// changes the result of a retry.
#[async_trait]
pub trait Collaborator: Send + Sync + Debug {
    /// Returns the collaborator name, used in logs.
    fn name(&self) -> &str;

    /// Produces the stage outputs from its inputs.
    async fn invoke(&self, inputs: &StageInputs) -> Result<StageProducts, CollaboratorError>;
}
