//! Text extraction from raw input documents.

use async_trait::async_trait;
use chrono::Utc;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::toolchain::{run_tool, scratch_dir, tail};
use crate::config::ExtractionConfig;
use crate::core::{Document, DocumentBundle, EXTRACTED_TEXT, RAW_INPUT_SET};
use crate::errors::CollaboratorError;
use crate::stages::{Collaborator, StageInputs, StageProducts};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Combines every document of the raw input set into one text payload.
///
/// Plain-text documents (`.txt`) are taken verbatim as pre-extracted text.
/// PDF documents are converted with `pdftotext -layout`; when that yields no
/// text (an image-only scan) the pages are rasterized with `pdftoppm` and
/// read with `tesseract`. A document that still has no text is unreadable.
/// Each document is preceded by a `SOURCE FILE:` header between separator
/// rules.
#[derive(Debug, Clone)]
pub struct TextExtractor {
    config: ExtractionConfig,
}

impl TextExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    async fn extract(&self, document: &Document) -> Result<String, CollaboratorError> {
        let size = document.content.len() as u64;
        if size > self.config.max_document_bytes() {
            return Err(CollaboratorError::permanent(format!(
                "document '{}' is {size} bytes, over the {} MB limit",
                document.name, self.config.max_document_mb
            )));
        }

        let text = if document.extension().as_deref() == Some("txt") {
            String::from_utf8(document.content.clone()).map_err(|_| {
                CollaboratorError::permanent(format!(
                    "unreadable document '{}': text is not valid UTF-8",
                    document.name
                ))
            })?
        } else if document.content.starts_with(PDF_MAGIC) {
            self.pdf_text(document).await?
        } else {
            return Err(CollaboratorError::permanent(format!(
                "unsupported format: '{}' is neither a PDF nor a .txt file",
                document.name
            )));
        };

        if text.trim().is_empty() {
            return Err(CollaboratorError::permanent(format!(
                "unreadable document '{}': no text could be extracted",
                document.name
            )));
        }
        Ok(text)
    }

    async fn pdf_text(&self, document: &Document) -> Result<String, CollaboratorError> {
        let dir = scratch_dir("reportflow-extract")?;
        let source = dir.path().join("document.pdf");
        tokio::fs::write(&source, &document.content)
            .await
            .map_err(|e| CollaboratorError::transient(format!("cannot stage '{}': {e}", document.name)))?;

        let text = self.pdftotext(document, &source, dir.path()).await?;
        if !text.trim().is_empty() || !self.config.ocr {
            return Ok(text);
        }
        warn!(document = %document.name, "No text layer, falling back to OCR");
        self.ocr(document, &source, dir.path()).await
    }

    async fn pdftotext(
        &self,
        document: &Document,
        source: &Path,
        dir: &Path,
    ) -> Result<String, CollaboratorError> {
        let output = run_tool(
            &self.config.pdftotext_path,
            [OsStr::new("-layout"), source.as_os_str(), OsStr::new("-")],
            dir,
        )
        .await?;
        check_exit(document, "pdftotext", &output)?;
        debug!(document = %document.name, bytes = output.stdout.len(), "pdftotext finished");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ocr(
        &self,
        document: &Document,
        source: &Path,
        dir: &Path,
    ) -> Result<String, CollaboratorError> {
        let prefix = dir.join("page");
        let dpi = self.config.ocr_dpi.to_string();
        let output = run_tool(
            &self.config.pdftoppm_path,
            [
                OsStr::new("-r"),
                OsStr::new(&dpi),
                OsStr::new("-png"),
                source.as_os_str(),
                prefix.as_os_str(),
            ],
            dir,
        )
        .await?;
        check_exit(document, "pdftoppm", &output)?;

        let pages = rendered_pages(dir).await?;
        let mut text = String::new();
        for page in &pages {
            let output = run_tool(
                &self.config.tesseract_path,
                [page.as_os_str(), OsStr::new("stdout")],
                dir,
            )
            .await?;
            check_exit(document, "tesseract", &output)?;
            text.push_str(String::from_utf8_lossy(&output.stdout).trim_end());
            text.push('\n');
        }
        debug!(document = %document.name, pages = pages.len(), chars = text.len(), "OCR finished");
        Ok(text)
    }
}

fn check_exit(
    document: &Document,
    tool: &str,
    output: &std::process::Output,
) -> Result<(), CollaboratorError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(CollaboratorError::permanent(format!(
        "unreadable document '{}': {tool} exited with {}: {}",
        document.name,
        output.status,
        tail(stderr.trim(), 5)
    )))
}

/// Page images written by `pdftoppm`, in page order. Page numbers are
/// zero-padded to a common width, so name order is page order.
async fn rendered_pages(dir: &Path) -> Result<Vec<PathBuf>, CollaboratorError> {
    let unreadable =
        |e: std::io::Error| CollaboratorError::transient(format!("cannot list rendered pages: {e}"));
    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut pages = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        let is_page = path.extension().is_some_and(|e| e == "png")
            && path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with("page"));
        if is_page {
            pages.push(path);
        }
    }
    pages.sort();
    Ok(pages)
}

fn section(name: &str, text: &str) -> String {
    let rule = "=".repeat(80);
    format!(
        "\n{rule}\nSOURCE FILE: {name}\nEXTRACTED: {}\n\n{rule}\n\n{text}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    )
}

#[async_trait]
impl Collaborator for TextExtractor {
    fn name(&self) -> &str {
        "text-extractor"
    }

    async fn invoke(&self, inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        let bundle = DocumentBundle::from_payload(inputs.bytes(RAW_INPUT_SET)?)
            .map_err(|e| CollaboratorError::permanent(format!("malformed input set: {e}")))?;
        if bundle.is_empty() {
            return Err(CollaboratorError::permanent("input set contains no documents"));
        }

        let mut sections = Vec::with_capacity(bundle.len());
        for (i, document) in bundle.documents.iter().enumerate() {
            debug!(document = %document.name, index = i + 1, total = bundle.len(), "Extracting document");
            let text = self.extract(document).await?;
            sections.push(section(&document.name, &text));
        }

        let combined = sections.join("\n");
        info!(documents = bundle.len(), chars = combined.len(), "Extraction complete");
        Ok(StageProducts::new().with(EXTRACTED_TEXT, combined))
    }
}
