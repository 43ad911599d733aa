//! Error types for the reportflow orchestrator.
//!
//! Two layers of errors exist:
//!
//! - [`ReportflowError`] is returned from store and orchestrator operations
//!   that cannot produce an execution report at all (a claimed run id, an
//!   invalid pipeline, an I/O failure on the staging area).
//! - [`CollaboratorError`] is raised by external collaborators. The stage
//!   runner absorbs it and re-emits it as an [`ErrorDetail`] carrying a
//!   normalized [`ErrorKind`], which is all the orchestrator ever inspects.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for reportflow operations.
#[derive(Debug, Error)]
pub enum ReportflowError {
    /// An artifact already exists for this run and name.
    #[error("Artifact conflict: '{name}' already exists in run '{run_id}'")]
    ArtifactConflict {
        /// The run that owns the artifact.
        run_id: String,
        /// The artifact name.
        name: String,
    },

    /// An artifact was requested that the run does not contain.
    #[error("Artifact missing: '{name}' not found in run '{run_id}'")]
    ArtifactMissing {
        /// The run that was searched.
        run_id: String,
        /// The artifact name.
        name: String,
    },

    /// The run identifier has already been claimed.
    #[error("Run already exists: '{run_id}'")]
    RunAlreadyExists {
        /// The duplicated run identifier.
        run_id: String,
    },

    /// The run identifier is not known to the store.
    #[error("Run not found: '{run_id}'")]
    RunNotFound {
        /// The unknown run identifier.
        run_id: String,
    },

    /// An artifact name or run identifier is not usable as a storage key.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReportflowError {
    /// Creates an artifact conflict error.
    #[must_use]
    pub fn artifact_conflict(run_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ArtifactConflict {
            run_id: run_id.into(),
            name: name.into(),
        }
    }

    /// Creates an artifact missing error.
    #[must_use]
    pub fn artifact_missing(run_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ArtifactMissing {
            run_id: run_id.into(),
            name: name.into(),
        }
    }

    /// Creates a run already exists error.
    #[must_use]
    pub fn run_already_exists(run_id: impl Into<String>) -> Self {
        Self::RunAlreadyExists {
            run_id: run_id.into(),
        }
    }

    /// Creates an invalid key error.
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns the normalized kind this error maps to when it surfaces
    /// inside a stage outcome.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArtifactConflict { .. } => ErrorKind::ArtifactConflict,
            Self::ArtifactMissing { .. } => ErrorKind::MissingDependency,
            Self::RunAlreadyExists { .. } => ErrorKind::RunAlreadyExists,
            Self::Io(_) => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }
}

/// Normalized error taxonomy recorded in stage outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A declared input was absent when the stage became due. Never retried.
    MissingDependency,
    /// Timeouts, rate limits, transient I/O. Retried within the stage budget.
    Transient,
    /// Malformed input or output, missing toolchain. Fails immediately.
    Permanent,
    /// Attempted overwrite of an immutable artifact.
    ArtifactConflict,
    /// The run identifier was already in use.
    RunAlreadyExists,
    /// The run was cancelled while the stage was in flight.
    Cancelled,
}

impl ErrorKind {
    /// Returns true if the stage runner may retry an attempt that failed
    /// with this kind.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency => write!(f, "missing_dependency"),
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::ArtifactConflict => write!(f, "artifact_conflict"),
            Self::RunAlreadyExists => write!(f, "run_already_exists"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error detail attached to a failed or cancelled stage outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// The normalized kind.
    pub kind: ErrorKind,
    /// The raw message from the last failing attempt.
    pub message: String,
    /// Whether the failure must stop the whole run regardless of policy.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub abort_run: bool,
}

impl ErrorDetail {
    /// Creates a new error detail.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            abort_run: false,
        }
    }

    /// Marks the failure as aborting the run.
    #[must_use]
    pub fn aborting(mut self) -> Self {
        self.abort_run = true;
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Retry classification a collaborator assigns to its own failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worth retrying.
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// Error raised by an external collaborator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    /// Retry classification.
    pub class: FailureClass,
    /// Human-readable detail.
    pub message: String,
    /// Stop the whole run, even when the pipeline continues degraded.
    pub abort_run: bool,
}

impl CollaboratorError {
    /// Creates a transient (retryable) error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
            abort_run: false,
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
            abort_run: false,
        }
    }

    /// Creates a permanent error that aborts the whole run (e.g. a missing
    /// toolchain).
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
            abort_run: true,
        }
    }

    /// Returns true if this error is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }

    /// Converts to the normalized detail recorded in a stage outcome.
    #[must_use]
    pub fn to_detail(&self) -> ErrorDetail {
        let kind = match self.class {
            FailureClass::Transient => ErrorKind::Transient,
            FailureClass::Permanent => ErrorKind::Permanent,
        };
        ErrorDetail {
            kind,
            message: self.message.clone(),
            abort_run: self.abort_run,
        }
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}
