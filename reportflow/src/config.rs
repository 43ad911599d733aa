//! Workflow configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config
//! file. The CLI layers its flags (and their environment variables) on top.

use crate::core::StageKind;
use crate::errors::ReportflowError;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeout and retry budget for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Bound on each attempt, in seconds.
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,
    /// Transient failures retried before the stage fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            timeout_secs: default_stage_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl StagePolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            timeout_secs,
            max_retries,
        }
    }

    /// The timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-stage policies for the standard pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePolicies {
    /// Text extraction.
    #[serde(default)]
    pub extraction: StagePolicy,
    /// Report synthesis. Talks to a rate-limited service, so it gets more
    /// retries.
    #[serde(default = "default_synthesis_policy")]
    pub synthesis: StagePolicy,
    /// Markup generation.
    #[serde(default = "default_markup_policy")]
    pub markup: StagePolicy,
    /// Document compilation.
    #[serde(default)]
    pub compilation: StagePolicy,
}

fn default_synthesis_policy() -> StagePolicy {
    StagePolicy::new(default_stage_timeout_secs(), 3)
}

fn default_markup_policy() -> StagePolicy {
    StagePolicy::new(60, 0)
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            extraction: StagePolicy::default(),
            synthesis: default_synthesis_policy(),
            markup: default_markup_policy(),
            compilation: StagePolicy::default(),
        }
    }
}

impl StagePolicies {
    /// Returns the policy for a stage kind.
    #[must_use]
    pub fn for_kind(&self, kind: StageKind) -> &StagePolicy {
        match kind {
            StageKind::Extraction => &self.extraction,
            StageKind::Synthesis => &self.synthesis,
            StageKind::Markup => &self.markup,
            StageKind::Compilation => &self.compilation,
        }
    }

    /// Applies one timeout to every stage.
    pub fn set_timeout_secs(&mut self, timeout_secs: u64) {
        for policy in [
            &mut self.extraction,
            &mut self.synthesis,
            &mut self.markup,
            &mut self.compilation,
        ] {
            policy.timeout_secs = timeout_secs;
        }
    }
}

/// What the orchestrator does after a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failed stage; later stages are skipped.
    #[default]
    FailFast,
    /// Keep running later stages whose inputs exist. The run ends
    /// `PartiallyFailed`.
    ContinueDegraded,
}

/// Settings for the text extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// `pdftotext` executable.
    #[serde(default = "default_pdftotext_path")]
    pub pdftotext_path: PathBuf,
    /// Documents larger than this are rejected.
    #[serde(default = "default_max_document_mb")]
    pub max_document_mb: u64,
    /// OCR PDFs whose text layer is empty (image-only scans).
    #[serde(default = "default_ocr")]
    pub ocr: bool,
    /// `pdftoppm` executable, rasterizes pages for OCR.
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: PathBuf,
    /// `tesseract` executable.
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: PathBuf,
    /// Rasterization resolution for OCR.
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
}

fn default_pdftotext_path() -> PathBuf {
    PathBuf::from("pdftotext")
}

fn default_ocr() -> bool {
    true
}

fn default_pdftoppm_path() -> PathBuf {
    PathBuf::from("pdftoppm")
}

fn default_tesseract_path() -> PathBuf {
    PathBuf::from("tesseract")
}

fn default_ocr_dpi() -> u32 {
    300
}

fn default_max_document_mb() -> u64 {
    50
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdftotext_path: default_pdftotext_path(),
            max_document_mb: default_max_document_mb(),
            ocr: default_ocr(),
            pdftoppm_path: default_pdftoppm_path(),
            tesseract_path: default_tesseract_path(),
            ocr_dpi: default_ocr_dpi(),
        }
    }
}

impl ExtractionConfig {
    /// Size limit in bytes.
    #[must_use]
    pub fn max_document_bytes(&self) -> u64 {
        self.max_document_mb.saturating_mul(1024 * 1024)
    }
}

/// Settings for the synthesis collaborator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Provider API key. Never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// API base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// HTTP request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for SynthesisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Settings for the compilation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationConfig {
    /// `pdflatex` executable.
    #[serde(default = "default_pdflatex_path")]
    pub pdflatex_path: PathBuf,
    /// Number of passes; the second resolves the table of contents.
    #[serde(default = "default_passes")]
    pub passes: u32,
}

fn default_pdflatex_path() -> PathBuf {
    PathBuf::from("pdflatex")
}

fn default_passes() -> u32 {
    2
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            pdflatex_path: default_pdflatex_path(),
            passes: default_passes(),
        }
    }
}

/// Top-level configuration of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Root of the artifact store; one subdirectory per run.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Per-stage timeout and retry budget.
    #[serde(default)]
    pub stages: StagePolicies,
    /// Delay between retries.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Behaviour after a stage failure.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Extraction settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Synthesis settings.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Compilation settings.
    #[serde(default)]
    pub compilation: CompilationConfig,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("./workflow")
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            stages: StagePolicies::default(),
            retry: RetryPolicy::default(),
            failure_policy: FailurePolicy::default(),
            extraction: ExtractionConfig::default(),
            synthesis: SynthesisConfig::default(),
            compilation: CompilationConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReportflowError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, ReportflowError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the policy for one stage.
    #[must_use]
    pub fn with_stage_policy(mut self, kind: StageKind, policy: StagePolicy) -> Self {
        match kind {
            StageKind::Extraction => self.stages.extraction = policy,
            StageKind::Synthesis => self.stages.synthesis = policy,
            StageKind::Markup => self.stages.markup = policy,
            StageKind::Compilation => self.stages.compilation = policy,
        }
        self
    }

    /// Sets the synthesis API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.synthesis.api_key = Some(api_key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BackoffStrategy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = WorkflowConfig::from_json_str("{}").unwrap();
        assert_eq!(config, WorkflowConfig::default());
        assert_eq!(config.extraction.max_document_mb, 50);
        assert!(config.extraction.ocr);
        assert_eq!(config.extraction.ocr_dpi, 300);
        assert_eq!(config.compilation.passes, 2);
        assert_eq!(config.stages.extraction.timeout_secs, 300);
        assert_eq!(config.stages.synthesis.max_retries, 3);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.retry.backoff, BackoffStrategy::Linear);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = WorkflowConfig::from_json_str(
            r#"{
                "workdir": "/tmp/wf",
                "failure_policy": "continue_degraded",
                "stages": {"compilation": {"max_retries": 0}},
                "synthesis": {"model": "gemini-pro", "api_key": "k"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.workdir, PathBuf::from("/tmp/wf"));
        assert_eq!(config.failure_policy, FailurePolicy::ContinueDegraded);
        assert_eq!(config.stages.compilation, StagePolicy::new(300, 0));
        assert_eq!(config.synthesis.model, "gemini-pro");
        assert_eq!(config.synthesis.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_api_key_is_not_serialized_or_printed() {
        let config = WorkflowConfig::new().with_api_key("secret-key");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret-key"));
        assert!(!format!("{config:?}").contains("secret-key"));
    }

    #[test]
    fn test_setters() {
        let mut config = WorkflowConfig::new()
            .with_stage_policy(StageKind::Markup, StagePolicy::new(5, 1))
            .with_failure_policy(FailurePolicy::ContinueDegraded)
            .with_workdir("/srv/reports");
        assert_eq!(config.workdir, PathBuf::from("/srv/reports"));
        assert_eq!(config.stages.for_kind(StageKind::Markup).timeout(), Duration::from_secs(5));

        config.stages.set_timeout_secs(42);
        assert!(StageKind::ALL
            .iter()
            .all(|k| config.stages.for_kind(*k).timeout_secs == 42));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, r#"{"compilation": {"passes": 3}}"#).unwrap();
        assert_eq!(WorkflowConfig::from_json_file(&path).unwrap().compilation.passes, 3);
        assert!(WorkflowConfig::from_json_file(dir.path().join("absent.json")).is_err());
    }
}
