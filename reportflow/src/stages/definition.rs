//! Stage definition.

use super::Collaborator;
use crate::core::StageKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Timeout applied to a stage that does not set one.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Retries allowed to a stage that does not set a budget.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// One statically declared step of a pipeline.
#[derive(Clone)]
pub struct StageDefinition {
    /// Unique name within the pipeline.
    pub name: String,
    /// Which fixed step this is, if it is one of the standard four.
    pub kind: Option<StageKind>,
    /// Sequence position, assigned by the pipeline builder.
    pub position: usize,
    /// Artifacts that must exist before the stage may run.
    pub inputs: Vec<String>,
    /// Artifacts the stage must leave in the store to succeed.
    pub outputs: Vec<String>,
    /// The collaborator doing the work.
    pub collaborator: Arc<dyn Collaborator>,
    /// Bound on each attempt.
    pub timeout: Duration,
    /// Transient failures retried before giving up. Attempts are
    /// `max_retries + 1` at most.
    pub max_retries: u32,
}

impl StageDefinition {
    /// Creates a stage with no inputs or outputs and default limits.
    pub fn new(name: impl Into<String>, collaborator: Arc<dyn Collaborator>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            position: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            collaborator,
            timeout: DEFAULT_STAGE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the declared inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Sets the declared outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("collaborator", &self.collaborator.name())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
