//! Test assertions for execution reports.

use crate::core::{RunId, RunStatus, StageStatus};
use crate::errors::ErrorKind;
use crate::report::ExecutionReport;
use crate::store::ArtifactStore;

/// Asserts the run's overall status.
pub fn assert_run_status(report: &ExecutionReport, expected: RunStatus) {
    assert_eq!(
        report.status, expected,
        "Expected run status {:?}, got {:?}. First failure: {:?}",
        expected,
        report.status,
        report.first_failure()
    );
}

/// Asserts that the run succeeded.
pub fn assert_run_succeeded(report: &ExecutionReport) {
    assert_run_status(report, RunStatus::Succeeded);
}

/// Asserts the status of a named stage.
pub fn assert_stage_status(report: &ExecutionReport, stage: &str, expected: StageStatus) {
    let record = report
        .stage(stage)
        .unwrap_or_else(|| panic!("No record for stage '{stage}' in {:?}", stage_names(report)));
    assert_eq!(
        record.status, expected,
        "Expected stage '{stage}' to be {expected:?}, got {:?} ({:?})",
        record.status, record.error
    );
}

/// Asserts that a named stage failed with the given error kind.
pub fn assert_stage_failed_with(report: &ExecutionReport, stage: &str, kind: ErrorKind) {
    assert_stage_status(report, stage, StageStatus::Failed);
    let error = report
        .stage(stage)
        .and_then(|r| r.error.as_ref())
        .unwrap_or_else(|| panic!("Stage '{stage}' failed without error detail"));
    assert_eq!(error.kind, kind, "Unexpected error kind for '{stage}': {error}");
}

/// Asserts the order of stage records.
pub fn assert_stage_order(report: &ExecutionReport, expected: &[&str]) {
    assert_eq!(stage_names(report), expected, "Unexpected stage record order");
}

/// Asserts that none of `names` exist in the run.
pub async fn assert_artifacts_absent(store: &dyn ArtifactStore, run_id: &RunId, names: &[&str]) {
    for name in names {
        assert!(
            !store.exists(run_id, name).await,
            "Expected artifact '{name}' to be absent from run '{run_id}'"
        );
    }
}

fn stage_names(report: &ExecutionReport) -> Vec<&str> {
    report.stages.iter().map(|s| s.name.as_str()).collect()
}
