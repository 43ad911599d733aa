//! LaTeX source to PDF with `pdflatex`.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::toolchain::{run_tool, scratch_dir, tail};
use crate::config::CompilationConfig;
use crate::core::{FINAL_DOCUMENT, MARKUP_SOURCE};
use crate::errors::CollaboratorError;
use crate::stages::{Collaborator, StageInputs, StageProducts};

const JOB_NAME: &str = "report";
const LOG_TAIL_LINES: usize = 20;

/// Compiles the markup source into the final PDF document.
#[derive(Debug, Clone)]
pub struct PdfLatexCompiler {
    config: CompilationConfig,
}

impl PdfLatexCompiler {
    /// Creates a compiler.
    #[must_use]
    pub fn new(config: CompilationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Collaborator for PdfLatexCompiler {
    fn name(&self) -> &str {
        "pdflatex"
    }

    async fn invoke(&self, inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        let source = inputs.bytes(MARKUP_SOURCE)?;
        let dir = scratch_dir("reportflow-compile")?;
        let tex_name = format!("{JOB_NAME}.tex");
        let tex = dir.path().join(&tex_name);
        let pdf = dir.path().join(format!("{JOB_NAME}.pdf"));
        tokio::fs::write(&tex, source)
            .await
            .map_err(|e| CollaboratorError::transient(format!("cannot stage markup source: {e}")))?;

        let passes = self.config.passes.max(1);
        for pass in 1..=passes {
            debug!(pass, passes, "Running pdflatex");
            let output = run_tool(
                &self.config.pdflatex_path,
                [
                    "-interaction=nonstopmode",
                    "-halt-on-error",
                    "-jobname",
                    JOB_NAME,
                    tex_name.as_str(),
                ],
                dir.path(),
            )
            .await?;

            if !output.status.success() {
                if pdf.exists() {
                    warn!(pass, status = %output.status, "pdflatex reported errors but produced a PDF");
                    continue;
                }
                let log = tokio::fs::read_to_string(dir.path().join(format!("{JOB_NAME}.log")))
                    .await
                    .unwrap_or_else(|_| String::from_utf8_lossy(&output.stdout).into_owned());
                return Err(CollaboratorError::permanent(format!(
                    "pdflatex failed on pass {pass} ({}):\n{}",
                    output.status,
                    tail(&log, LOG_TAIL_LINES)
                )));
            }
        }

        let document = tokio::fs::read(&pdf).await.map_err(|_| {
            CollaboratorError::permanent("pdflatex finished but produced no PDF")
        })?;
        info!(bytes = document.len(), passes, "PDF compiled");
        Ok(StageProducts::new().with(FINAL_DOCUMENT, document))
    }
}
