//! Pipeline builder with validation.

use crate::config::StagePolicies;
use crate::core::{
    validate_key, StageKind, EXTRACTED_TEXT, FINAL_DOCUMENT, MARKUP_SOURCE, RAW_INPUT_SET,
    SYNTHESIZED_REPORT,
};
use crate::errors::PipelineValidationError;
use crate::stages::{Collaborator, StageDefinition};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A validated, ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageDefinition>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Inputs no stage produces; the caller must supply them when a run
    /// starts. Ordered by first use.
    #[must_use]
    pub fn external_inputs(&self) -> Vec<&str> {
        let produced: HashSet<&str> = self
            .stages
            .iter()
            .flat_map(|s| s.outputs.iter().map(String::as_str))
            .collect();
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .flat_map(|s| s.inputs.iter().map(String::as_str))
            .filter(|name| !produced.contains(name) && seen.insert(*name))
            .collect()
    }

    /// The artifact a fully successful run leaves behind: the last output
    /// of the last stage.
    #[must_use]
    pub fn final_output(&self) -> Option<&str> {
        self.stages
            .last()
            .and_then(|s| s.outputs.last())
            .map(String::as_str)
    }

    /// Builds the fixed four-stage document-to-report pipeline.
    pub fn standard(
        policies: &StagePolicies,
        extractor: Arc<dyn Collaborator>,
        synthesizer: Arc<dyn Collaborator>,
        markup: Arc<dyn Collaborator>,
        compiler: Arc<dyn Collaborator>,
    ) -> Result<Self, PipelineValidationError> {
        let wiring = [
            (StageKind::Extraction, extractor, RAW_INPUT_SET, EXTRACTED_TEXT),
            (StageKind::Synthesis, synthesizer, EXTRACTED_TEXT, SYNTHESIZED_REPORT),
            (StageKind::Markup, markup, SYNTHESIZED_REPORT, MARKUP_SOURCE),
            (StageKind::Compilation, compiler, MARKUP_SOURCE, FINAL_DOCUMENT),
        ];

        wiring
            .into_iter()
            .fold(
                PipelineBuilder::new("medical-report"),
                |builder, (kind, collaborator, input, output)| {
                    let policy = policies.for_kind(kind);
                    builder.stage(
                        StageDefinition::new(kind.stage_name(), collaborator)
                            .with_kind(kind)
                            .with_inputs(&[input])
                            .with_outputs(&[output])
                            .with_timeout(policy.timeout())
                            .with_max_retries(policy.max_retries),
                    )
                },
            )
            .build()
    }
}

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDefinition>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage. Validation happens in [`PipelineBuilder::build`].
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the stages and assigns their positions.
    ///
    /// # Errors
    ///
    /// Fails when the pipeline is empty, a stage or artifact name is not a
    /// valid key, two stages share a name, a stage declares no outputs, two
    /// stages declare the same output, or a stage consumes an artifact that
    /// only it or a later stage produces.
    pub fn build(mut self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages"));
        }

        let mut names = HashSet::new();
        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if let Err(e) = validate_key(&stage.name) {
                return Err(PipelineValidationError::new(format!("Invalid stage name: {e}"))
                    .with_stages(vec![stage.name.clone()]));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage name '{}'",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()]));
            }
            if stage.outputs.is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' declares no outputs",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()]));
            }
            for artifact in stage.inputs.iter().chain(&stage.outputs) {
                if let Err(e) = validate_key(artifact) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' declares an invalid artifact name: {e}",
                        stage.name
                    ))
                    .with_stages(vec![stage.name.clone()]));
                }
            }
            for output in &stage.outputs {
                if let Some(&other) = producers.get(output.as_str()) {
                    return Err(PipelineValidationError::new(format!(
                        "Artifact '{output}' is produced by more than one stage"
                    ))
                    .with_stages(vec![self.stages[other].name.clone(), stage.name.clone()]));
                }
                producers.insert(output.as_str(), index);
            }
        }

        for (index, stage) in self.stages.iter().enumerate() {
            for input in &stage.inputs {
                if let Some(&producer) = producers.get(input.as_str()) {
                    if producer >= index {
                        return Err(PipelineValidationError::new(format!(
                            "Stage '{}' consumes '{input}', which is produced by '{}' at or after it",
                            stage.name, self.stages[producer].name
                        ))
                        .with_stages(vec![
                            stage.name.clone(),
                            self.stages[producer].name.clone(),
                        ]));
                    }
                }
            }
        }

        for (position, stage) in self.stages.iter_mut().enumerate() {
            stage.position = position;
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}
