//! Built-in collaborators for the standard medical-report pipeline.
//!
//! | Stage       | Collaborator              | External dependency     |
//! |-------------|---------------------------|-------------------------|
//! | extraction  | [`TextExtractor`]         | `pdftotext` for PDFs    |
//! | synthesis   | `GeminiSynthesizer`       | Gemini API (`gemini`)   |
//! | markup      | [`LatexMarkupGenerator`]  | none                    |
//! | compilation | [`PdfLatexCompiler`]      | `pdflatex`              |

mod compilation;
mod extraction;
mod markup;
#[cfg(feature = "gemini")]
mod synthesis;
mod toolchain;

pub use compilation::PdfLatexCompiler;
pub use extraction::TextExtractor;
pub use markup::{escape_latex, render_body, LatexMarkupGenerator};
#[cfg(feature = "gemini")]
pub use synthesis::{build_prompt, GeminiSynthesizer, REPORT_SECTIONS};

#[cfg(feature = "gemini")]
use crate::{config::WorkflowConfig, errors::ReportflowError, pipeline::Pipeline};
#[cfg(feature = "gemini")]
use std::sync::Arc;

/// Wires the built-in collaborators into the standard pipeline.
///
/// # Errors
///
/// Returns an error if the HTTP client for synthesis cannot be built.
#[cfg(feature = "gemini")]
pub fn standard_pipeline(config: &WorkflowConfig) -> Result<Pipeline, ReportflowError> {
    Ok(Pipeline::standard(
        &config.stages,
        Arc::new(TextExtractor::new(config.extraction.clone())),
        Arc::new(GeminiSynthesizer::new(config.synthesis.clone())?),
        Arc::new(LatexMarkupGenerator::new()),
        Arc::new(PdfLatexCompiler::new(config.compilation.clone())),
    )?)
}

#[cfg(all(test, feature = "gemini"))]
mod tests {
    use super::*;
    use crate::core::StageKind;

    #[test]
    fn test_standard_pipeline_applies_stage_policies() {
        let config = WorkflowConfig::default();
        let pipeline = standard_pipeline(&config).unwrap();

        assert_eq!(pipeline.name(), "medical-report");
        for kind in StageKind::ALL {
            let stage = pipeline.stage(kind.stage_name()).unwrap();
            let policy = config.stages.for_kind(kind);
            assert_eq!(stage.timeout, policy.timeout());
            assert_eq!(stage.max_retries, policy.max_retries);
        }
        assert_eq!(
            pipeline.stage("synthesis").unwrap().collaborator.name(),
            "gemini-synthesizer"
        );
    }
}
