//! Incremental on-disk journal of a run.
//!
//! Two files live beside the run's artifacts:
//!
//! - `execution_report.json`, rewritten atomically after every stage record,
//! - `execution_log.txt`, one line appended per event.
//!
//! A crash mid-run therefore leaves a partial but well-formed report.

use super::ExecutionReport;
use crate::core::RunId;
use crate::errors::ReportflowError;
use crate::events::EventSink;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Structured report file name.
pub const EXECUTION_REPORT_FILE: &str = "execution_report.json";
/// Plain-text event log file name.
pub const EXECUTION_LOG_FILE: &str = "execution_log.txt";

/// Writer for one run's report and log files.
///
/// Clones share one log handle, so lines land in the order they were
/// appended.
#[derive(Debug, Clone)]
pub struct RunJournal {
    dir: PathBuf,
    log: Arc<Mutex<Option<fs::File>>>,
}

impl RunJournal {
    /// Opens the journal for a run under `root`, creating `<root>/<run_id>`.
    pub async fn open(root: impl AsRef<Path>, run_id: &RunId) -> Result<Self, ReportflowError> {
        let dir = root.as_ref().join(run_id.as_str());
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            log: Arc::new(Mutex::new(None)),
        })
    }

    /// Directory holding the journal files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the structured report.
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.dir.join(EXECUTION_REPORT_FILE)
    }

    /// Path of the text log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(EXECUTION_LOG_FILE)
    }

    /// Replaces the report file with the current state of `report`.
    pub async fn write_report(&self, report: &ExecutionReport) -> Result<(), ReportflowError> {
        let json = report.to_json()?;
        let tmp = self.dir.join(format!(".{EXECUTION_REPORT_FILE}.tmp"));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, self.report_path()).await?;
        Ok(())
    }

    /// Reads a persisted report.
    pub async fn read_report(
        root: impl AsRef<Path>,
        run_id: &RunId,
    ) -> Result<ExecutionReport, ReportflowError> {
        let path = root.as_ref().join(run_id.as_str()).join(EXECUTION_REPORT_FILE);
        match fs::read_to_string(&path).await {
            Ok(json) => ExecutionReport::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ReportflowError::RunNotFound {
                run_id: run_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Appends one line to the text log. The line is on disk when this
    /// returns.
    pub async fn append_line(&self, line: &str) -> Result<(), ReportflowError> {
        let mut log = self.log.lock().await;
        let file = match log.take() {
            Some(file) => file,
            None => {
                fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.log_path())
                    .await?
            }
        };
        let file = log.insert(file);
        file.write_all(format_line(line).as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

fn format_line(line: &str) -> String {
    format!("[{}] {line}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"))
}

fn event_line(event_type: &str, data: Option<&serde_json::Value>) -> String {
    let source = data
        .and_then(|d| d.get("stage"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("orchestrator");
    match data {
        Some(data) => format!("{source}: {event_type} {data}"),
        None => format!("{source}: {event_type}"),
    }
}

/// Event sink that mirrors every event into the run's text log before
/// forwarding it.
pub struct JournalEventSink {
    journal: RunJournal,
    inner: Arc<dyn EventSink>,
}

impl JournalEventSink {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(journal: RunJournal, inner: Arc<dyn EventSink>) -> Self {
        Self { journal, inner }
    }
}

impl std::fmt::Debug for JournalEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalEventSink")
            .field("dir", &self.journal.dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for JournalEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let line = event_line(event_type, data.as_ref());
        if let Err(e) = self.journal.append_line(&line).await {
            warn!(error = %e, event_type, "Failed to append to execution log");
        }
        self.inner.emit(event_type, data).await;
    }
}
