//! Stage kind, stage status and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed step of the document-to-report pipeline a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Raw documents to one combined text payload.
    Extraction,
    /// Combined text to a structured narrative report.
    Synthesis,
    /// Report text to typesetting source.
    Markup,
    /// Typesetting source to the final document bytes.
    Compilation,
}

impl StageKind {
    /// All kinds, in pipeline order.
    pub const ALL: [Self; 4] = [
        Self::Extraction,
        Self::Synthesis,
        Self::Markup,
        Self::Compilation,
    ];

    /// The stage name used for this kind in the standard pipeline.
    #[must_use]
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Synthesis => "synthesis",
            Self::Markup => "markup",
            Self::Compilation => "compilation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage_name())
    }
}

/// The status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet reached.
    #[default]
    Pending,
    /// Attempts in progress.
    Running,
    /// All declared outputs are in the store.
    Succeeded,
    /// Retry budget exhausted or a non-retryable error occurred.
    Failed,
    /// Not attempted because an earlier stage failed or the run stopped.
    Skipped,
    /// Interrupted by run cancellation.
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// The overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no stage started.
    #[default]
    Pending,
    /// Stages are executing.
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed and the run stopped.
    Failed,
    /// A stage failed but the run continued degraded.
    PartiallyFailed,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::PartiallyFailed => write!(f, "partially_failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true once the run can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Process exit code the CLI reports for this status.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed | Self::Pending | Self::Running => 1,
            Self::PartiallyFailed => 2,
            Self::Cancelled => 130,
        }
    }
}
