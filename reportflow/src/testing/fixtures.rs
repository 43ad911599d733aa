//! Ready-made pipelines and inputs for tests and benchmarks.

use std::sync::Arc;

use super::StaticCollaborator;
use crate::config::StagePolicies;
use crate::core::{
    Document, DocumentBundle, EXTRACTED_TEXT, FINAL_DOCUMENT, MARKUP_SOURCE, SYNTHESIZED_REPORT,
};
use crate::errors::PipelineValidationError;
use crate::pipeline::{Pipeline, RunInputs};
use crate::stages::Collaborator;

/// Stage policies with a short timeout, for tests.
#[must_use]
pub fn test_policies() -> StagePolicies {
    let mut policies = StagePolicies::default();
    policies.set_timeout_secs(5);
    policies
}

/// A bundle of `count` small plain-text documents.
#[must_use]
pub fn sample_bundle(count: usize) -> DocumentBundle {
    (1..=count).fold(DocumentBundle::new(), |bundle, i| {
        bundle.with_document(Document::new(
            format!("record-{i}.txt"),
            format!("Patient visit {i}: blood pressure 120/80.").into_bytes(),
        ))
    })
}

/// Run inputs holding [`sample_bundle`].
#[must_use]
pub fn sample_inputs(count: usize) -> RunInputs {
    RunInputs::from_bundle(&sample_bundle(count)).unwrap_or_default()
}

/// The standard four-stage pipeline wired to the given collaborators, using
/// [`test_policies`].
pub fn standard_with(
    extraction: Arc<dyn Collaborator>,
    synthesis: Arc<dyn Collaborator>,
    markup: Arc<dyn Collaborator>,
    compilation: Arc<dyn Collaborator>,
) -> Result<Pipeline, PipelineValidationError> {
    Pipeline::standard(&test_policies(), extraction, synthesis, markup, compilation)
}

/// Static collaborators producing each standard artifact, in stage order.
#[must_use]
pub fn static_collaborators() -> [Arc<StaticCollaborator>; 4] {
    [
        Arc::new(StaticCollaborator::new("extract").with_output(EXTRACTED_TEXT, b"text".to_vec())),
        Arc::new(StaticCollaborator::new("synthesize").with_output(SYNTHESIZED_REPORT, b"report".to_vec())),
        Arc::new(StaticCollaborator::new("markup").with_output(MARKUP_SOURCE, b"\\documentclass{article}".to_vec())),
        Arc::new(StaticCollaborator::new("compile").with_output(FINAL_DOCUMENT, b"%PDF-1.5".to_vec())),
    ]
}

/// The standard pipeline where every stage succeeds immediately.
pub fn static_standard() -> Result<Pipeline, PipelineValidationError> {
    let [a, b, c, d] = static_collaborators();
    standard_with(a, b, c, d)
}
