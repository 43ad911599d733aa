//! Execution report: the auditable record of one run.

mod journal;

pub use journal::{JournalEventSink, RunJournal, EXECUTION_LOG_FILE, EXECUTION_REPORT_FILE};

use crate::core::{ArtifactRef, RunId, RunStatus, StageStatus};
use crate::errors::{ErrorDetail, ReportflowError};
use crate::pipeline::StageOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One stage's entry in the execution report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Position in the pipeline.
    pub position: usize,
    /// Final status.
    pub status: StageStatus,
    /// Attempts made; 0 for skipped and carried-forward stages.
    pub attempts: u32,
    /// When the stage became due.
    pub started_at: DateTime<Utc>,
    /// Wall time across all attempts.
    pub duration_ms: u64,
    /// Last error, for failed and cancelled stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Names of the artifacts the stage left in the store.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Run the outputs were carried forward from, for resumed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carried_from: Option<RunId>,
}

impl StageRecord {
    /// Record for a stage that was never attempted.
    #[must_use]
    pub fn skipped(name: impl Into<String>, position: usize) -> Self {
        Self {
            name: name.into(),
            position,
            status: StageStatus::Skipped,
            attempts: 0,
            started_at: Utc::now(),
            duration_ms: 0,
            error: None,
            outputs: Vec::new(),
            carried_from: None,
        }
    }

    /// Record for a stage whose outputs were copied from an earlier run.
    #[must_use]
    pub fn carried(
        name: impl Into<String>,
        position: usize,
        outputs: Vec<String>,
        from: &RunId,
    ) -> Self {
        Self {
            status: StageStatus::Succeeded,
            outputs,
            carried_from: Some(from.clone()),
            ..Self::skipped(name, position)
        }
    }
}

impl From<&StageOutcome> for StageRecord {
    fn from(outcome: &StageOutcome) -> Self {
        Self {
            name: outcome.stage.clone(),
            position: outcome.position,
            status: outcome.status,
            attempts: outcome.attempts,
            started_at: outcome.started_at,
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            error: outcome.error.clone(),
            outputs: outcome.outputs.iter().map(|r| r.name.clone()).collect(),
            carried_from: None,
        }
    }
}

/// Structured record of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// The run.
    pub run_id: RunId,
    /// Pipeline name.
    pub pipeline: String,
    /// Overall status.
    pub status: RunStatus,
    /// When the run was claimed.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Per-stage records in pipeline order.
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    /// The final document, when the run produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<ArtifactRef>,
    /// The run this one resumed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<RunId>,
}

impl ExecutionReport {
    /// Starts a report for a freshly claimed run.
    #[must_use]
    pub fn new(run_id: RunId, pipeline: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            stages: Vec::new(),
            final_artifact: None,
            resumed_from: None,
        }
    }

    /// Appends a stage record.
    pub fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    /// Marks the run terminal.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Looks up a stage record by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The first stage that failed or was cancelled.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.status.is_failure())
    }

    /// Number of stages with the given status.
    #[must_use]
    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }

    /// Total wall time, once the run has ended.
    #[must_use]
    pub fn total_duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| {
            u64::try_from((end - self.started_at).num_milliseconds()).unwrap_or_default()
        })
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, ReportflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a report from JSON.
    pub fn from_json(json: &str) -> Result<Self, ReportflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the human-readable summary.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "REPORTFLOW - EXECUTION REPORT");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Run: {}", self.run_id);
        let _ = writeln!(out, "Pipeline: {}", self.pipeline);
        let _ = writeln!(out, "Status: {}", self.status);
        let _ = writeln!(out, "Started at: {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(ended) = self.ended_at {
            let _ = writeln!(out, "Ended at: {}", ended.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(prior) = &self.resumed_from {
            let _ = writeln!(out, "Resumed from: {prior}");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Total Stages: {}", self.stages.len());
        let _ = writeln!(out, "Succeeded: {}", self.count(StageStatus::Succeeded));
        let _ = writeln!(out, "Failed: {}", self.count(StageStatus::Failed));
        let _ = writeln!(out, "Skipped: {}", self.count(StageStatus::Skipped));
        let cancelled = self.count(StageStatus::Cancelled);
        if cancelled > 0 {
            let _ = writeln!(out, "Cancelled: {cancelled}");
        }
        if let Some(total) = self.total_duration_ms() {
            let _ = writeln!(out, "Total Execution Time: {}", seconds(total));
        }
        let _ = writeln!(out);

        for stage in &self.stages {
            let marker = match stage.status {
                StageStatus::Succeeded => "[OK]",
                StageStatus::Failed => "[FAILED]",
                StageStatus::Cancelled => "[CANCELLED]",
                StageStatus::Skipped => "[SKIPPED]",
                StageStatus::Pending | StageStatus::Running => "[..]",
            };
            let _ = writeln!(out, "{marker} {}", stage.name);
            let _ = writeln!(out, "   Status: {}", stage.status);
            let _ = writeln!(out, "   Attempts: {}", stage.attempts);
            let _ = writeln!(out, "   Time: {}", seconds(stage.duration_ms));
            if !stage.outputs.is_empty() {
                let _ = writeln!(out, "   Outputs: {}", stage.outputs.join(", "));
            }
            if let Some(from) = &stage.carried_from {
                let _ = writeln!(out, "   Carried from: {from}");
            }
            if let Some(error) = &stage.error {
                let _ = writeln!(out, "   Error: {error}");
            }
            let _ = writeln!(out);
        }

        if let Some(artifact) = &self.final_artifact {
            let location = artifact
                .location
                .as_ref()
                .map_or_else(|| artifact.name.clone(), |p| p.display().to_string());
            let _ = writeln!(out, "Final document: {location}");
        }

        out
    }
}

fn seconds(ms: u64) -> String {
    format!("{}.{:02}s", ms / 1000, (ms % 1000) / 10)
}
