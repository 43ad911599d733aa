//! Stage runner: one stage, many attempts, one outcome.

use super::RetryPolicy;
use crate::cancellation::CancellationToken;
use crate::core::{ArtifactRef, RunId, StageStatus};
use crate::errors::{CollaboratorError, ErrorDetail, ErrorKind};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::stages::{StageDefinition, StageInputs, StageProducts};
use crate::store::ArtifactStore;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of running one stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Run the stage belonged to.
    pub run_id: RunId,
    /// Stage name.
    pub stage: String,
    /// Position in the pipeline.
    pub position: usize,
    /// `Succeeded`, `Failed` or `Cancelled`.
    pub status: StageStatus,
    /// Attempts made. 0 when the stage never reached its collaborator.
    pub attempts: u32,
    /// When the stage became due.
    pub started_at: DateTime<Utc>,
    /// Wall time across all attempts and delays.
    pub duration: Duration,
    /// Last error, unless the stage succeeded.
    pub error: Option<ErrorDetail>,
    /// Artifacts written, in declared order. Empty unless succeeded.
    pub outputs: Vec<ArtifactRef>,
}

impl StageOutcome {
    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// Returns true if the failure must stop the run whatever the policy.
    #[must_use]
    pub fn aborts_run(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.abort_run)
    }
}

/// What a single attempt ended with.
enum Attempt {
    Written(Vec<ArtifactRef>),
    Failed(ErrorDetail),
    Cancelled,
}

/// Runs stages under their timeout and retry budget.
#[derive(Clone)]
pub struct StageRunner {
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("retry", &self.retry)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl StageRunner {
    /// Creates a runner with the given retry delays.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the cancellation token raced against every attempt.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs one stage to a final outcome.
    ///
    /// Either every declared output of the stage is in the store afterwards,
    /// or none of the outputs written by this call are.
    pub async fn run(
        &self,
        stage: &StageDefinition,
        store: &dyn ArtifactStore,
        run_id: &RunId,
    ) -> StageOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        let finish = |status, attempts, error, outputs| StageOutcome {
            run_id: run_id.clone(),
            stage: stage.name.clone(),
            position: stage.position,
            status,
            attempts,
            started_at,
            duration: clock.elapsed(),
            error,
            outputs,
        };

        let inputs = match self.load_inputs(stage, store, run_id).await {
            Ok(inputs) => inputs,
            Err(detail) => {
                warn!(run_id = %run_id, stage = %stage.name, error = %detail, "Stage inputs unavailable");
                return finish(StageStatus::Failed, 0, Some(detail), Vec::new());
            }
        };

        self.events
            .emit(
                events::STAGE_STARTED,
                Some(json!({
                    "run_id": run_id,
                    "stage": stage.name,
                    "collaborator": stage.collaborator.name(),
                    "max_attempts": stage.max_attempts(),
                })),
            )
            .await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return finish(
                    StageStatus::Cancelled,
                    attempt - 1,
                    Some(self.cancelled_detail()),
                    Vec::new(),
                );
            }

            debug!(run_id = %run_id, stage = %stage.name, attempt, "Starting attempt");
            let detail = match self.attempt(stage, store, run_id, &inputs).await {
                Attempt::Written(outputs) => {
                    info!(
                        run_id = %run_id,
                        stage = %stage.name,
                        attempt,
                        duration_ms = millis(clock.elapsed()),
                        "Stage succeeded"
                    );
                    return finish(StageStatus::Succeeded, attempt, None, outputs);
                }
                Attempt::Cancelled => {
                    return finish(
                        StageStatus::Cancelled,
                        attempt,
                        Some(self.cancelled_detail()),
                        Vec::new(),
                    );
                }
                Attempt::Failed(detail) => detail,
            };

            if !detail.kind.is_retryable() || attempt >= stage.max_attempts() {
                warn!(
                    run_id = %run_id,
                    stage = %stage.name,
                    attempt,
                    kind = %detail.kind,
                    error = %detail.message,
                    "Stage failed"
                );
                return finish(StageStatus::Failed, attempt, Some(detail), Vec::new());
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                run_id = %run_id,
                stage = %stage.name,
                attempt,
                delay_ms = millis(delay),
                error = %detail.message,
                "Transient failure, retrying"
            );
            self.events
                .emit(
                    events::STAGE_RETRYING,
                    Some(json!({
                        "run_id": run_id,
                        "stage": stage.name,
                        "attempt": attempt,
                        "delay_ms": millis(delay),
                        "error": detail,
                    })),
                )
                .await;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return finish(
                        StageStatus::Cancelled,
                        attempt,
                        Some(self.cancelled_detail()),
                        Vec::new(),
                    );
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn load_inputs(
        &self,
        stage: &StageDefinition,
        store: &dyn ArtifactStore,
        run_id: &RunId,
    ) -> Result<StageInputs, ErrorDetail> {
        let mut inputs = StageInputs::new();
        for name in &stage.inputs {
            if !store.exists(run_id, name).await {
                return Err(ErrorDetail::new(
                    ErrorKind::MissingDependency,
                    format!("required input '{name}' is not in the store"),
                ));
            }
            let payload = store
                .get(run_id, name)
                .await
                .map_err(|e| ErrorDetail::new(e.kind(), e.to_string()))?;
            inputs.insert(name.clone(), payload);
        }
        Ok(inputs)
    }

    async fn attempt(
        &self,
        stage: &StageDefinition,
        store: &dyn ArtifactStore,
        run_id: &RunId,
        inputs: &StageInputs,
    ) -> Attempt {
        let call = tokio::time::timeout(stage.timeout, stage.collaborator.invoke(inputs));
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Attempt::Cancelled,
            result = call => result,
        };

        let products = match result {
            Ok(Ok(products)) => products,
            Ok(Err(e)) => return Attempt::Failed(e.to_detail()),
            Err(_) => {
                return Attempt::Failed(ErrorDetail::new(
                    ErrorKind::Transient,
                    format!("timed out after {}s", stage.timeout.as_secs_f64()),
                ))
            }
        };

        if let Err(e) = check_shape(stage, &products) {
            return Attempt::Failed(e.to_detail());
        }
        match write_outputs(stage, store, run_id, products).await {
            Ok(outputs) => Attempt::Written(outputs),
            Err(detail) => Attempt::Failed(detail),
        }
    }

    fn cancelled_detail(&self) -> ErrorDetail {
        ErrorDetail::new(
            ErrorKind::Cancelled,
            self.cancel
                .reason()
                .unwrap_or_else(|| "run cancelled".to_string()),
        )
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn check_shape(stage: &StageDefinition, products: &StageProducts) -> Result<(), CollaboratorError> {
    if let Some(missing) = stage.outputs.iter().find(|o| !products.contains(o)) {
        return Err(CollaboratorError::permanent(format!(
            "invalid response shape: collaborator '{}' returned no '{missing}' output",
            stage.collaborator.name()
        )));
    }
    for extra in products.names().filter(|n| !stage.outputs.iter().any(|o| o == n)) {
        warn!(stage = %stage.name, artifact = extra, "Ignoring undeclared output");
    }
    Ok(())
}

async fn write_outputs(
    stage: &StageDefinition,
    store: &dyn ArtifactStore,
    run_id: &RunId,
    mut products: StageProducts,
) -> Result<Vec<ArtifactRef>, ErrorDetail> {
    for name in &stage.outputs {
        if store.exists(run_id, name).await {
            return Err(ErrorDetail::new(
                ErrorKind::ArtifactConflict,
                format!("output '{name}' already exists in run '{run_id}'"),
            ));
        }
    }

    let mut written = Vec::with_capacity(stage.outputs.len());
    for name in &stage.outputs {
        let payload = products.take(name).unwrap_or_default();
        match store.put(run_id, name, &payload, &stage.name).await {
            Ok(reference) => written.push(reference),
            Err(e) => {
                for reference in &written {
                    if let Err(rollback) = store.discard(run_id, &reference.name).await {
                        warn!(
                            run_id = %run_id,
                            artifact = %reference.name,
                            error = %rollback,
                            "Failed to roll back partial output"
                        );
                    }
                }
                return Err(ErrorDetail::new(e.kind(), e.to_string()));
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::store::InMemoryArtifactStore;
    use crate::testing::{FailingPutStore, ScriptedCollaborator, SlowCollaborator, StaticCollaborator};

    async fn store_with(run: &RunId, inputs: &[(&str, &[u8])]) -> InMemoryArtifactStore {
        let store = InMemoryArtifactStore::new();
        store.begin_run(run).await.unwrap();
        for (name, payload) in inputs {
            store.put(run, name, payload, "input").await.unwrap();
        }
        store
    }

    fn runner() -> StageRunner {
        StageRunner::new(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_success_writes_declared_outputs() {
        let run = RunId::parse("ok").unwrap();
        let store = store_with(&run, &[("in", b"x")]).await;
        let stage = StageDefinition::new(
            "s",
            Arc::new(StaticCollaborator::new("c").with_output("out", b"y".to_vec())),
        )
        .with_inputs(&["in"])
        .with_outputs(&["out"]);

        let outcome = runner().run(&stage, &store, &run).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.outputs[0].producing_stage, "s");
        assert_eq!(store.get(&run, "out").await.unwrap(), b"y");
    }

    #[tokio::test]
    async fn test_missing_input_is_missing_dependency_without_attempt() {
        let run = RunId::parse("missing").unwrap();
        let store = store_with(&run, &[]).await;
        let collaborator = Arc::new(StaticCollaborator::new("c").with_output("out", b"y".to_vec()));
        let stage = StageDefinition::new("s", collaborator.clone())
            .with_inputs(&["in"])
            .with_outputs(&["out"]);

        let outcome = runner().run(&stage, &store, &run).await;
        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::MissingDependency);
        assert_eq!(collaborator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_retried_until_budget_exhausted() {
        let run = RunId::parse("exhaust").unwrap();
        let store = store_with(&run, &[]).await;
        let collaborator = Arc::new(ScriptedCollaborator::new("c").always(Err(
            CollaboratorError::transient("503 Service Unavailable"),
        )));
        let stage = StageDefinition::new("s", collaborator.clone())
            .with_outputs(&["out"])
            .with_max_retries(2);

        let outcome = runner().run(&stage, &store, &run).await;
        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(collaborator.call_count(), 3);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let run = RunId::parse("permanent").unwrap();
        let store = store_with(&run, &[]).await;
        let collaborator = Arc::new(
            ScriptedCollaborator::new("c").then(Err(CollaboratorError::permanent("bad input"))),
        );
        let stage = StageDefinition::new("s", collaborator.clone())
            .with_outputs(&["out"])
            .with_max_retries(5);

        let outcome = runner().run(&stage, &store, &run).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let run = RunId::parse("timeout").unwrap();
        let store = store_with(&run, &[]).await;
        let stage = StageDefinition::new(
            "s",
            Arc::new(SlowCollaborator::new("slow", Duration::from_secs(5))),
        )
        .with_outputs(&["out"])
        .with_timeout(Duration::from_millis(20))
        .with_max_retries(1);

        let outcome = runner().run(&stage, &store, &run).await;
        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.attempts, 2);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Transient);
        assert!(error.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_declared_output_is_permanent() {
        let run = RunId::parse("shape").unwrap();
        let store = store_with(&run, &[]).await;
        let stage = StageDefinition::new(
            "s",
            Arc::new(StaticCollaborator::new("c").with_output("a", b"1".to_vec())),
        )
        .with_outputs(&["a", "b"]);

        let outcome = runner().run(&stage, &store, &run).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Permanent);
        assert!(error.message.contains("invalid response shape"));
        assert!(!store.exists(&run, "a").await);
    }

    #[tokio::test]
    async fn test_existing_output_is_conflict() {
        let run = RunId::parse("conflict").unwrap();
        let store = store_with(&run, &[("out", b"stale")]).await;
        let stage = StageDefinition::new(
            "s",
            Arc::new(StaticCollaborator::new("c").with_output("out", b"new".to_vec())),
        )
        .with_outputs(&["out"]);

        let outcome = runner().run(&stage, &store, &run).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.unwrap().kind, ErrorKind::ArtifactConflict);
        assert_eq!(store.get(&run, "out").await.unwrap(), b"stale");
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_earlier_outputs() {
        let run = RunId::parse("rollback").unwrap();
        let store = FailingPutStore::new("b");
        store.begin_run(&run).await.unwrap();
        let stage = StageDefinition::new(
            "s",
            Arc::new(
                StaticCollaborator::new("c")
                    .with_output("a", b"1".to_vec())
                    .with_output("b", b"2".to_vec()),
            ),
        )
        .with_outputs(&["a", "b"])
        .with_max_retries(0);

        let outcome = runner().run(&stage, &store, &run).await;
        assert_eq!(outcome.status, StageStatus::Failed);
        assert!(outcome.outputs.is_empty());
        assert!(!store.exists(&run, "a").await);
        assert!(!store.exists(&run, "b").await);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_collaborator() {
        let run = RunId::parse("cancel").unwrap();
        let store = store_with(&run, &[]).await;
        let cancel = Arc::new(CancellationToken::new());
        let stage = StageDefinition::new(
            "s",
            Arc::new(SlowCollaborator::new("slow", Duration::from_secs(30))),
        )
        .with_outputs(&["out"]);

        let runner = runner().with_cancellation(cancel.clone());
        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel("operator interrupt");
            })
        };

        let outcome = runner.run(&stage, &store, &run).await;
        trigger.await.unwrap();
        assert_eq!(outcome.status, StageStatus::Cancelled);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(error.message, "operator interrupt");
        assert!(!store.exists(&run, "out").await);
        assert!(outcome.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_retry_emits_events() {
        let run = RunId::parse("events").unwrap();
        let store = store_with(&run, &[]).await;
        let sink = Arc::new(CollectingEventSink::new());
        let stage = StageDefinition::new(
            "s",
            Arc::new(
                ScriptedCollaborator::new("c")
                    .then(Err(CollaboratorError::transient("429")))
                    .then(Ok(StageProducts::new().with("out", b"ok".to_vec()))),
            ),
        )
        .with_outputs(&["out"]);

        let outcome = runner()
            .with_event_sink(sink.clone())
            .run(&stage, &store, &run)
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(sink.event_types(), [events::STAGE_STARTED, events::STAGE_RETRYING]);
    }
}
