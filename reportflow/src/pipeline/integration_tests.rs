//! End-to-end tests for runs of the standard pipeline.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::collaborators::TextExtractor;
    use crate::config::{ExtractionConfig, FailurePolicy};
    use crate::core::{
        RunId, RunStatus, StageStatus, EXTRACTED_TEXT, FINAL_DOCUMENT, MARKUP_SOURCE,
        RAW_INPUT_SET, SYNTHESIZED_REPORT,
    };
    use crate::errors::{CollaboratorError, ErrorKind, ReportflowError};
    use crate::events::{self, CollectingEventSink};
    use crate::pipeline::{Orchestrator, Pipeline, PipelineBuilder, RetryPolicy};
    use crate::report::{RunJournal, EXECUTION_LOG_FILE};
    use crate::stages::{Collaborator, StageDefinition, StageInputs, StageProducts};
    use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
    use crate::testing::{
        assert_artifacts_absent, assert_run_succeeded, assert_stage_failed_with,
        assert_stage_order, assert_stage_status, sample_inputs, standard_with,
        static_collaborators, static_standard, RecordingCollaborator, ScriptedCollaborator,
        SlowCollaborator, StaticCollaborator,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const STANDARD_ORDER: [&str; 4] = ["extraction", "synthesis", "markup", "compilation"];

    fn orchestrator(store: Arc<dyn ArtifactStore>) -> Orchestrator {
        Orchestrator::new(store).with_retry(RetryPolicy::immediate())
    }

    fn products(name: &str, payload: &[u8]) -> StageProducts {
        StageProducts::new().with(name, payload.to_vec())
    }

    /// Standard pipeline with the synthesis collaborator swapped out.
    fn with_synthesis(synthesis: Arc<dyn Collaborator>) -> Pipeline {
        let [extract, _, markup, compile] = static_collaborators();
        standard_with(extract, synthesis, markup, compile).unwrap()
    }

    /// Standard pipeline with the compilation collaborator swapped out.
    fn with_compilation(compilation: Arc<dyn Collaborator>) -> Pipeline {
        let [extract, synthesize, markup, _] = static_collaborators();
        standard_with(extract, synthesize, markup, compilation).unwrap()
    }

    /// Cancels the run from inside its own invocation, then succeeds.
    #[derive(Debug)]
    struct CancellingCollaborator {
        token: Arc<CancellationToken>,
        output: &'static str,
    }

    #[async_trait]
    impl Collaborator for CancellingCollaborator {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn invoke(&self, _inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
            self.token.cancel("operator interrupt");
            Ok(products(self.output, b"done"))
        }
    }

    #[tokio::test]
    async fn test_successful_run_leaves_final_document() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let report = orchestrator(store.clone())
            .execute_new(&static_standard().unwrap(), sample_inputs(1))
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert!(store.exists(&report.run_id, FINAL_DOCUMENT).await);
        assert_eq!(report.final_artifact.as_ref().unwrap().name, FINAL_DOCUMENT);
        assert_eq!(report.status.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_three_documents_through_four_stages() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let [_, synthesize, markup, compile] = static_collaborators();
        let pipeline = standard_with(
            Arc::new(TextExtractor::new(ExtractionConfig::default())),
            synthesize,
            markup,
            compile,
        )
        .unwrap();

        let report = orchestrator(store.clone())
            .execute_new(&pipeline, sample_inputs(3))
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert_stage_order(&report, &STANDARD_ORDER);
        for (position, record) in report.stages.iter().enumerate() {
            assert_eq!(record.status, StageStatus::Succeeded);
            assert_eq!(record.position, position);
        }

        let text = store.get(&report.run_id, EXTRACTED_TEXT).await.unwrap();
        let text = String::from_utf8(text).unwrap();
        for i in 1..=3 {
            assert!(text.contains(&format!("SOURCE FILE: record-{i}.txt")));
        }
        for name in [RAW_INPUT_SET, EXTRACTED_TEXT, SYNTHESIZED_REPORT, MARKUP_SOURCE, FINAL_DOCUMENT] {
            assert!(store.exists(&report.run_id, name).await, "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_later_stages() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let synthesis = Arc::new(
            ScriptedCollaborator::new("synth")
                .always(Err(CollaboratorError::permanent("empty input"))),
        );

        let report = orchestrator(store.clone())
            .execute_new(&with_synthesis(synthesis.clone()), sample_inputs(1))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(synthesis.call_count(), 1);
        assert_stage_failed_with(&report, "synthesis", ErrorKind::Permanent);
        assert_stage_status(&report, "markup", StageStatus::Skipped);
        assert_stage_status(&report, "compilation", StageStatus::Skipped);
        assert_eq!(report.first_failure().unwrap().name, "synthesis");
        assert_artifacts_absent(
            store.as_ref(),
            &report.run_id,
            &[SYNTHESIZED_REPORT, MARKUP_SOURCE, FINAL_DOCUMENT],
        )
        .await;
        assert!(report.final_artifact.is_none());
    }

    #[tokio::test]
    async fn test_fresh_run_never_reads_failed_run() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let failing = Arc::new(
            ScriptedCollaborator::new("synth").always(Err(CollaboratorError::permanent("bad"))),
        );
        let first = orchestrator(store.clone())
            .execute_new(&with_synthesis(failing), sample_inputs(1))
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Failed);

        let recorder = Arc::new(RecordingCollaborator::new("recorder").with_output(SYNTHESIZED_REPORT, b"r".to_vec()));
        let [_, _, markup, compile] = static_collaborators();
        let pipeline = standard_with(
            Arc::new(StaticCollaborator::new("extract").with_output(EXTRACTED_TEXT, b"second".to_vec())),
            recorder.clone(),
            markup,
            compile,
        )
        .unwrap();
        let second = orchestrator(store.clone())
            .execute_new(&pipeline, sample_inputs(1))
            .await
            .unwrap();

        assert_run_succeeded(&second);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(recorder.last_payload(EXTRACTED_TEXT), Some(b"second".to_vec()));
        assert_eq!(store.get(&first.run_id, EXTRACTED_TEXT).await.unwrap(), b"text");
        assert!(!store.exists(&first.run_id, FINAL_DOCUMENT).await);
    }

    #[tokio::test]
    async fn test_success_on_final_attempt_counts_every_attempt() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let extraction = Arc::new(
            ScriptedCollaborator::new("extract")
                .then(Err(CollaboratorError::transient("disk busy")))
                .then(Err(CollaboratorError::transient("disk busy")))
                .always(Ok(products(EXTRACTED_TEXT, b"text"))),
        );
        let [_, synthesize, markup, compile] = static_collaborators();
        let pipeline = standard_with(extraction, synthesize, markup, compile).unwrap();
        let max_retries = pipeline.stage("extraction").unwrap().max_retries;

        let report = orchestrator(store)
            .execute_new(&pipeline, sample_inputs(1))
            .await
            .unwrap();

        assert_run_succeeded(&report);
        let record = report.stage("extraction").unwrap();
        assert_eq!(record.status, StageStatus::Succeeded);
        assert_eq!(record.attempts, max_retries + 1);
    }

    #[tokio::test]
    async fn test_rate_limited_synthesis_succeeds_on_third_attempt() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let synthesis = Arc::new(
            ScriptedCollaborator::new("synth")
                .then(Err(CollaboratorError::transient("429 Too Many Requests")))
                .then(Err(CollaboratorError::transient("429 Too Many Requests")))
                .always(Ok(products(SYNTHESIZED_REPORT, b"report"))),
        );
        let pipeline = with_synthesis(synthesis.clone());
        assert_eq!(pipeline.stage("synthesis").unwrap().max_retries, 3);

        let report = orchestrator(store)
            .with_event_sink(sink.clone())
            .execute_new(&pipeline, sample_inputs(1))
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert_eq!(report.stage("synthesis").unwrap().attempts, 3);
        assert_eq!(synthesis.call_count(), 3);
        assert_eq!(sink.events_of_type(events::STAGE_RETRYING).len(), 2);
    }

    #[tokio::test]
    async fn test_compilation_syntax_error_fails_run() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let compilation = Arc::new(
            ScriptedCollaborator::new("pdflatex")
                .always(Err(CollaboratorError::permanent("! Undefined control sequence."))),
        );

        let report = orchestrator(store.clone())
            .execute_new(&with_compilation(compilation), sample_inputs(1))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.status.exit_code(), 1);
        assert_stage_failed_with(&report, "compilation", ErrorKind::Permanent);
        assert_eq!(report.stages[3].attempts, 1);
        assert!(report.stages[3]
            .error
            .as_ref()
            .unwrap()
            .message
            .contains("Undefined control sequence"));
        assert!(!store.exists(&report.run_id, FINAL_DOCUMENT).await);
        assert!(store.exists(&report.run_id, MARKUP_SOURCE).await);
    }

    #[tokio::test]
    async fn test_double_put_conflicts_in_every_store() {
        let dir = tempfile::tempdir().unwrap();
        let stores: [Arc<dyn ArtifactStore>; 2] = [
            Arc::new(InMemoryArtifactStore::new()),
            Arc::new(FsArtifactStore::new(dir.path())),
        ];
        let run = RunId::parse("conflict").unwrap();

        for store in stores {
            store.begin_run(&run).await.unwrap();
            store.put(&run, EXTRACTED_TEXT, b"same", "extraction").await.unwrap();
            let err = store
                .put(&run, EXTRACTED_TEXT, b"same", "extraction")
                .await
                .unwrap_err();
            assert!(matches!(err, ReportflowError::ArtifactConflict { .. }));
            assert_eq!(store.get(&run, EXTRACTED_TEXT).await.unwrap(), b"same");
        }
    }

    #[tokio::test]
    async fn test_reused_run_id_is_rejected() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let pipeline = static_standard().unwrap();
        let run = RunId::parse("2024-06-01-ward-a").unwrap();
        let orchestrator = orchestrator(store);

        orchestrator
            .execute(&pipeline, run.clone(), sample_inputs(1))
            .await
            .unwrap();
        let err = orchestrator
            .execute(&pipeline, run, sample_inputs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ReportflowError::RunAlreadyExists { .. }));
        assert_eq!(err.kind(), ErrorKind::RunAlreadyExists);
    }

    #[tokio::test]
    async fn test_continue_degraded_runs_independent_stages() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let pipeline = PipelineBuilder::new("degraded")
            .stage(
                StageDefinition::new(
                    "charts",
                    Arc::new(
                        ScriptedCollaborator::new("charts")
                            .always(Err(CollaboratorError::permanent("bad chart data"))),
                    ),
                )
                .with_inputs(&["raw"])
                .with_outputs(&["charts"]),
            )
            .stage(
                StageDefinition::new(
                    "summary",
                    Arc::new(StaticCollaborator::new("summary").with_output("summary", b"s".to_vec())),
                )
                .with_inputs(&["raw"])
                .with_outputs(&["summary"]),
            )
            .stage(
                StageDefinition::new(
                    "appendix",
                    Arc::new(StaticCollaborator::new("appendix").with_output("appendix", b"a".to_vec())),
                )
                .with_inputs(&["charts"])
                .with_outputs(&["appendix"]),
            )
            .build()
            .unwrap();

        let report = orchestrator(store)
            .with_failure_policy(FailurePolicy::ContinueDegraded)
            .execute_new(&pipeline, crate::pipeline::RunInputs::new().with("raw", b"r".to_vec()))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::PartiallyFailed);
        assert_eq!(report.status.exit_code(), 2);
        assert_stage_status(&report, "charts", StageStatus::Failed);
        assert_stage_status(&report, "summary", StageStatus::Succeeded);
        assert_stage_status(&report, "appendix", StageStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cancellation_between_stages() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let token = Arc::new(CancellationToken::new());
        let [extract, _, markup, compile] = static_collaborators();
        let pipeline = standard_with(
            extract,
            Arc::new(CancellingCollaborator {
                token: token.clone(),
                output: SYNTHESIZED_REPORT,
            }),
            markup.clone(),
            compile,
        )
        .unwrap();

        let report = orchestrator(store.clone())
            .with_cancellation(token)
            .execute_new(&pipeline, sample_inputs(1))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.status.exit_code(), 130);
        assert_stage_status(&report, "synthesis", StageStatus::Succeeded);
        assert_stage_status(&report, "markup", StageStatus::Skipped);
        assert_stage_status(&report, "compilation", StageStatus::Skipped);
        assert_eq!(markup.call_count(), 0);
        assert!(store.exists(&report.run_id, SYNTHESIZED_REPORT).await);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_running_stage() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let token = Arc::new(CancellationToken::new());
        let pipeline = with_synthesis(Arc::new(
            SlowCollaborator::new("slow", Duration::from_secs(30))
                .with_output(SYNTHESIZED_REPORT, b"late".to_vec()),
        ));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel("SIGINT");
        });

        let report = orchestrator(store.clone())
            .with_cancellation(token)
            .execute_new(&pipeline, sample_inputs(1))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        let synthesis = report.stage("synthesis").unwrap();
        assert_eq!(synthesis.status, StageStatus::Cancelled);
        assert_eq!(synthesis.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(synthesis.error.as_ref().unwrap().message, "SIGINT");
        assert_stage_status(&report, "markup", StageStatus::Skipped);
        assert!(!store.exists(&report.run_id, SYNTHESIZED_REPORT).await);
    }

    #[tokio::test]
    async fn test_resume_carries_completed_stages_forward() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let extraction = Arc::new(
            ScriptedCollaborator::new("extract").always(Ok(products(EXTRACTED_TEXT, b"text"))),
        );
        let [_, synthesize, markup, compile] = static_collaborators();
        let broken = standard_with(
            extraction.clone(),
            synthesize.clone(),
            markup.clone(),
            Arc::new(
                ScriptedCollaborator::new("pdflatex")
                    .always(Err(CollaboratorError::fatal("pdflatex: command not found"))),
            ),
        )
        .unwrap();
        let prior = orchestrator(store.clone())
            .execute_new(&broken, sample_inputs(1))
            .await
            .unwrap();
        assert_eq!(prior.status, RunStatus::Failed);

        let fixed = standard_with(extraction.clone(), synthesize.clone(), markup, compile).unwrap();
        let resumed_id = RunId::parse("resumed").unwrap();
        let report = orchestrator(store.clone())
            .resume(&fixed, &prior.run_id, resumed_id.clone())
            .await
            .unwrap();

        assert_run_succeeded(&report);
        assert_eq!(report.run_id, resumed_id);
        assert_eq!(report.resumed_from.as_ref(), Some(&prior.run_id));
        assert_eq!(extraction.call_count(), 1);
        assert_eq!(synthesize.call_count(), 1);
        for name in ["extraction", "synthesis", "markup"] {
            let record = report.stage(name).unwrap();
            assert_eq!(record.carried_from.as_ref(), Some(&prior.run_id));
            assert_eq!(record.attempts, 0);
        }
        assert_eq!(report.stage("compilation").unwrap().attempts, 1);
        assert!(store.exists(&resumed_id, RAW_INPUT_SET).await);
        assert!(store.exists(&resumed_id, FINAL_DOCUMENT).await);
        assert!(!store.exists(&prior.run_id, FINAL_DOCUMENT).await);
    }

    #[tokio::test]
    async fn test_fs_run_persists_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let report = orchestrator(store.clone())
            .with_journal(dir.path())
            .execute_new(&static_standard().unwrap(), sample_inputs(2))
            .await
            .unwrap();

        assert_run_succeeded(&report);
        let persisted = RunJournal::read_report(dir.path(), &report.run_id).await.unwrap();
        assert_eq!(persisted, report);

        let log = std::fs::read_to_string(store.run_dir(&report.run_id).join(EXECUTION_LOG_FILE)).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert!(lines.first().unwrap().contains("orchestrator: run.started"));
        assert!(lines.last().unwrap().contains("orchestrator: run.completed"));
        assert!(log.contains("compilation: stage.completed"));
        assert!(store
            .artifact_path(&report.run_id, FINAL_DOCUMENT)
            .is_file());
    }
}
