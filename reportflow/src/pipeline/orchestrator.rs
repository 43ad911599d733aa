//! Orchestrator: drives a pipeline's stages in order for one run.

use super::{Pipeline, RetryPolicy, StageOutcome, StageRunner};
use crate::cancellation::CancellationToken;
use crate::config::{FailurePolicy, WorkflowConfig};
use crate::core::{validate_key, DocumentBundle, RunId, RunStatus, StageStatus, INPUT_STAGE, RAW_INPUT_SET};
use crate::errors::ReportflowError;
use crate::events::{self, EventSink, NoOpEventSink};
use crate::report::{ExecutionReport, JournalEventSink, RunJournal, StageRecord};
use crate::stages::StageDefinition;
use crate::store::ArtifactStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Artifacts supplied to a run before its first stage.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    artifacts: Vec<(String, Vec<u8>)>,
}

impl RunInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input artifact.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push((name.into(), payload.into()));
        self
    }

    /// Inputs for the standard pipeline: the document bundle as
    /// `raw-input-set`.
    pub fn from_bundle(bundle: &DocumentBundle) -> Result<Self, ReportflowError> {
        Ok(Self::new().with(RAW_INPUT_SET, bundle.to_payload()?))
    }

    /// Input names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.iter().map(|(n, _)| n.as_str())
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Runs pipelines against an artifact store and reports the outcome.
///
/// Stages execute strictly in declared order. Under
/// [`FailurePolicy::FailFast`] the first failed stage ends the run and every
/// later stage is recorded as skipped.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    journal_root: Option<PathBuf>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("failure_policy", &self.failure_policy)
            .field("journal_root", &self.journal_root)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default policies over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
            journal_root: None,
        }
    }

    /// Creates an orchestrator using the retry and failure policies of
    /// `config`.
    #[must_use]
    pub fn from_config(store: Arc<dyn ArtifactStore>, config: &WorkflowConfig) -> Self {
        Self::new(store)
            .with_retry(config.retry.clone())
            .with_failure_policy(config.failure_policy)
    }

    /// Sets the retry delays.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the run cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persists each run's report and event log under `<root>/<run_id>/`.
    #[must_use]
    pub fn with_journal(mut self, root: impl Into<PathBuf>) -> Self {
        self.journal_root = Some(root.into());
        self
    }

    /// The artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// The cancellation token shared with every stage.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Executes `pipeline` as a new run named `run_id`.
    ///
    /// # Errors
    ///
    /// Returns an error, without a report, when the run cannot start:
    /// `RunAlreadyExists` if `run_id` was used before, or a store error
    /// while writing the initial inputs. Stage failures are not errors;
    /// they are recorded in the returned report.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        run_id: RunId,
        inputs: RunInputs,
    ) -> Result<ExecutionReport, ReportflowError> {
        for name in inputs.names() {
            validate_key(name)?;
        }
        self.store.begin_run(&run_id).await?;
        for (name, payload) in inputs.artifacts {
            self.store.put(&run_id, &name, &payload, INPUT_STAGE).await?;
        }

        let report = ExecutionReport::new(run_id, pipeline.name());
        self.drive(pipeline, report, 0).await
    }

    /// Executes `pipeline` under a freshly generated run identifier.
    pub async fn execute_new(
        &self,
        pipeline: &Pipeline,
        inputs: RunInputs,
    ) -> Result<ExecutionReport, ReportflowError> {
        self.execute(pipeline, RunId::generate(), inputs).await
    }

    /// Starts `new_run_id` from where `prior` left off.
    ///
    /// The initial inputs of `prior`, and the outputs of its leading run of
    /// completed stages, are copied into the new run. Those stages are
    /// recorded as succeeded with zero attempts; execution continues with
    /// the first stage whose outputs `prior` lacks. `prior` is never
    /// modified.
    ///
    /// # Errors
    ///
    /// `RunNotFound` if `prior` holds no artifacts, `RunAlreadyExists` if
    /// `new_run_id` was used before.
    pub async fn resume(
        &self,
        pipeline: &Pipeline,
        prior: &RunId,
        new_run_id: RunId,
    ) -> Result<ExecutionReport, ReportflowError> {
        if self.store.list(prior).await?.is_empty() {
            return Err(ReportflowError::RunNotFound {
                run_id: prior.to_string(),
            });
        }
        self.store.begin_run(&new_run_id).await?;

        for name in pipeline.external_inputs() {
            if self.store.exists(prior, name).await {
                self.carry(prior, &new_run_id, name, INPUT_STAGE).await?;
            }
        }

        let mut report = ExecutionReport::new(new_run_id.clone(), pipeline.name());
        report.resumed_from = Some(prior.clone());

        let mut start = 0;
        for stage in pipeline.stages() {
            if !self.outputs_present(stage, prior).await {
                break;
            }
            for output in &stage.outputs {
                self.carry(prior, &new_run_id, output, &stage.name).await?;
            }
            report.record(StageRecord::carried(
                &stage.name,
                stage.position,
                stage.outputs.clone(),
                prior,
            ));
            start += 1;
        }
        info!(run_id = %new_run_id, prior = %prior, carried = start, "Resuming run");

        self.drive(pipeline, report, start).await
    }

    async fn carry(
        &self,
        from: &RunId,
        to: &RunId,
        name: &str,
        producing_stage: &str,
    ) -> Result<(), ReportflowError> {
        let payload = self.store.get(from, name).await?;
        self.store.put(to, name, &payload, producing_stage).await?;
        Ok(())
    }

    async fn outputs_present(&self, stage: &StageDefinition, run_id: &RunId) -> bool {
        for output in &stage.outputs {
            if !self.store.exists(run_id, output).await {
                return false;
            }
        }
        true
    }

    async fn inputs_present(&self, stage: &StageDefinition, run_id: &RunId) -> bool {
        for input in &stage.inputs {
            if !self.store.exists(run_id, input).await {
                return false;
            }
        }
        true
    }

    async fn open_journal(&self, run_id: &RunId) -> (Arc<dyn EventSink>, Option<RunJournal>) {
        let Some(root) = &self.journal_root else {
            return (self.events.clone(), None);
        };
        match RunJournal::open(root, run_id).await {
            Ok(journal) => {
                let sink = JournalEventSink::new(journal.clone(), self.events.clone());
                (Arc::new(sink), Some(journal))
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Execution journal unavailable");
                (self.events.clone(), None)
            }
        }
    }

    async fn checkpoint(journal: Option<&RunJournal>, report: &ExecutionReport) {
        if let Some(journal) = journal {
            if let Err(e) = journal.write_report(report).await {
                warn!(run_id = %report.run_id, error = %e, "Failed to persist execution report");
            }
        }
    }

    async fn drive(
        &self,
        pipeline: &Pipeline,
        mut report: ExecutionReport,
        start: usize,
    ) -> Result<ExecutionReport, ReportflowError> {
        let run_id = report.run_id.clone();
        let (sink, journal) = self.open_journal(&run_id).await;
        let runner = StageRunner::new(self.retry.clone())
            .with_event_sink(sink.clone())
            .with_cancellation(self.cancel.clone());

        Self::checkpoint(journal.as_ref(), &report).await;
        sink.emit(
            events::RUN_STARTED,
            Some(json!({
                "run_id": run_id,
                "pipeline": pipeline.name(),
                "stages": pipeline.len(),
                "resumed_from": report.resumed_from,
            })),
        )
        .await;
        info!(run_id = %run_id, pipeline = pipeline.name(), "Run started");

        let mut failed = false;
        let mut halted: Option<RunStatus> = None;

        for stage in &pipeline.stages()[start..] {
            if halted.is_none() && self.cancel.is_cancelled() {
                halted = Some(RunStatus::Cancelled);
            }
            if let Some(status) = halted {
                let reason = if status == RunStatus::Cancelled {
                    "run cancelled"
                } else {
                    "earlier stage failed"
                };
                self.skip(&mut report, stage, reason, sink.as_ref()).await;
                Self::checkpoint(journal.as_ref(), &report).await;
                continue;
            }
            if failed && !self.inputs_present(stage, &run_id).await {
                self.skip(&mut report, stage, "inputs missing after earlier failure", sink.as_ref())
                    .await;
                Self::checkpoint(journal.as_ref(), &report).await;
                continue;
            }

            let outcome = runner.run(stage, self.store.as_ref(), &run_id).await;
            report.record(StageRecord::from(&outcome));
            Self::announce(&outcome, sink.as_ref()).await;

            match outcome.status {
                StageStatus::Succeeded => {}
                StageStatus::Cancelled => halted = Some(RunStatus::Cancelled),
                _ => {
                    failed = true;
                    if self.failure_policy == FailurePolicy::FailFast || outcome.aborts_run() {
                        halted = Some(RunStatus::Failed);
                    }
                }
            }
            Self::checkpoint(journal.as_ref(), &report).await;
        }

        let status = match halted {
            Some(status) => status,
            None if failed => RunStatus::PartiallyFailed,
            None => RunStatus::Succeeded,
        };

        if let Some(name) = pipeline.final_output() {
            if self.store.exists(&run_id, name).await {
                report.final_artifact = self.store.metadata(&run_id, name).await.ok();
            }
        }
        report.finish(status);

        sink.emit(
            events::RUN_COMPLETED,
            Some(json!({
                "run_id": run_id,
                "status": status,
                "duration_ms": report.total_duration_ms(),
                "first_failure": report.first_failure().map(|s| &s.name),
            })),
        )
        .await;
        Self::checkpoint(journal.as_ref(), &report).await;

        match status {
            RunStatus::Succeeded => info!(run_id = %run_id, "Run succeeded"),
            _ => warn!(run_id = %run_id, status = %status, "Run did not succeed"),
        }
        Ok(report)
    }

    async fn skip(
        &self,
        report: &mut ExecutionReport,
        stage: &StageDefinition,
        reason: &str,
        sink: &dyn EventSink,
    ) {
        report.record(StageRecord::skipped(&stage.name, stage.position));
        sink.emit(
            events::STAGE_SKIPPED,
            Some(json!({
                "run_id": report.run_id,
                "stage": stage.name,
                "reason": reason,
            })),
        )
        .await;
    }

    async fn announce(outcome: &StageOutcome, sink: &dyn EventSink) {
        let event = match outcome.status {
            StageStatus::Succeeded => events::STAGE_COMPLETED,
            StageStatus::Cancelled => events::STAGE_CANCELLED,
            _ => events::STAGE_FAILED,
        };
        sink.emit(
            event,
            Some(json!({
                "run_id": outcome.run_id,
                "stage": outcome.stage,
                "attempts": outcome.attempts,
                "duration_ms": u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
                "outputs": outcome.outputs.iter().map(|r| &r.name).collect::<Vec<_>>(),
                "error": outcome.error,
            })),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CollaboratorError, ErrorKind};
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::stages::StageProducts;
    use crate::store::InMemoryArtifactStore;
    use crate::testing::{ScriptedCollaborator, StaticCollaborator};

    fn two_stage(second: Arc<ScriptedCollaborator>) -> Pipeline {
        PipelineBuilder::new("two")
            .stage(
                StageDefinition::new(
                    "first",
                    Arc::new(StaticCollaborator::new("a").with_output("x", b"1".to_vec())),
                )
                .with_inputs(&["in"])
                .with_outputs(&["x"]),
            )
            .stage(
                StageDefinition::new("second", second)
                    .with_inputs(&["x"])
                    .with_outputs(&["y"])
                    .with_max_retries(0),
            )
            .build()
            .unwrap()
    }

    fn orchestrator(store: Arc<InMemoryArtifactStore>) -> Orchestrator {
        Orchestrator::new(store).with_retry(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_event_sequence_for_successful_run() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let second = Arc::new(
            ScriptedCollaborator::new("b").always(Ok(StageProducts::new().with("y", b"2".to_vec()))),
        );

        let report = orchestrator(store)
            .with_event_sink(sink.clone())
            .execute_new(&two_stage(second), RunInputs::new().with("in", b"0".to_vec()))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.final_artifact.as_ref().unwrap().name, "y");
        assert_eq!(
            sink.event_types(),
            [
                events::RUN_STARTED,
                events::STAGE_STARTED,
                events::STAGE_COMPLETED,
                events::STAGE_STARTED,
                events::STAGE_COMPLETED,
                events::RUN_COMPLETED,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_input_name_rejected_before_claiming() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let second = Arc::new(ScriptedCollaborator::new("b"));
        let err = orchestrator(store.clone())
            .execute_new(&two_stage(second), RunInputs::new().with("bad/name", b"0".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, ReportflowError::InvalidKey { .. }));
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_run_stops_degraded_run() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let pipeline = PipelineBuilder::new("abort")
            .stage(
                StageDefinition::new(
                    "toolchain",
                    Arc::new(
                        ScriptedCollaborator::new("t")
                            .always(Err(CollaboratorError::fatal("pdflatex: not found"))),
                    ),
                )
                .with_outputs(&["a"]),
            )
            .stage(
                StageDefinition::new(
                    "independent",
                    Arc::new(StaticCollaborator::new("i").with_output("b", b"1".to_vec())),
                )
                .with_outputs(&["b"]),
            )
            .build()
            .unwrap();

        let report = orchestrator(store)
            .with_failure_policy(FailurePolicy::ContinueDegraded)
            .execute_new(&pipeline, RunInputs::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.stages[0].error.as_ref().unwrap().kind, ErrorKind::Permanent);
        assert_eq!(report.stages[1].status, StageStatus::Skipped);
    }

    #[tokio::test]
    async fn test_resume_unknown_prior_is_run_not_found() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let second = Arc::new(ScriptedCollaborator::new("b"));
        let err = orchestrator(store)
            .resume(&two_stage(second), &RunId::parse("ghost").unwrap(), RunId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportflowError::RunNotFound { .. }));
    }
}
