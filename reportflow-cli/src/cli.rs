//! Command-line arguments and their mapping onto the workflow config.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reportflow::config::{FailurePolicy, WorkflowConfig};
use reportflow::core::{Document, DocumentBundle};
use std::path::{Path, PathBuf};

/// Turn a set of medical documents into one synthesized PDF report.
#[derive(Parser, Debug)]
#[command(name = "reportflow", version, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter, e.g. `info` or `reportflow=debug`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the workflow over a set of input documents.
    Run(RunArgs),
    /// Print the execution report of an earlier run.
    Report {
        /// Run identifier.
        run_id: String,
        #[command(flatten)]
        workdir: WorkdirArg,
        /// Print the human-readable summary instead of JSON.
        #[arg(long)]
        text: bool,
    },
    /// Delete every artifact and the journal of a run.
    Purge {
        /// Run identifier.
        run_id: String,
        #[command(flatten)]
        workdir: WorkdirArg,
    },
}

#[derive(Args, Debug, Clone)]
pub struct WorkdirArg {
    /// Artifact store root; one subdirectory per run.
    #[arg(long, env = "REPORTFLOW_WORKDIR")]
    pub workdir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Input files or directories (directories contribute their .pdf and .txt files).
    #[arg(required_unless_present = "resume_from")]
    pub inputs: Vec<PathBuf>,

    #[command(flatten)]
    pub workdir: WorkdirArg,

    /// Identifier for the new run. Generated when omitted.
    #[arg(long)]
    pub run_id: Option<String>,

    /// Carry the completed stages of this earlier run into the new one.
    #[arg(long, conflicts_with = "inputs")]
    pub resume_from: Option<String>,

    /// JSON configuration file.
    #[arg(long, env = "REPORTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the execution report here instead of stdout.
    #[arg(long)]
    pub report_out: Option<PathBuf>,

    /// Keep running stages whose inputs survive an earlier failure.
    #[arg(long)]
    pub continue_degraded: bool,

    /// Where to copy the final PDF. Defaults to
    /// `<workdir>/<run_id>/Final_Medical_Report.pdf`.
    #[arg(long)]
    pub final_output: Option<PathBuf>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini model.
    #[arg(long, env = "GEMINI_MODEL")]
    pub gemini_model: Option<String>,

    /// `pdflatex` executable.
    #[arg(long, env = "PDFLATEX_PATH")]
    pub pdflatex_path: Option<PathBuf>,

    /// `pdftotext` executable.
    #[arg(long, env = "PDFTOTEXT_PATH")]
    pub pdftotext_path: Option<PathBuf>,

    /// Largest accepted input document, in MB.
    #[arg(long, env = "MAX_PDF_SIZE_MB")]
    pub max_pdf_size_mb: Option<u64>,

    /// Timeout applied to every stage, in seconds.
    #[arg(long, env = "PROCESSING_TIMEOUT_SECONDS")]
    pub processing_timeout_seconds: Option<u64>,
}

impl RunArgs {
    /// Loads the config file (if any) and applies flag and environment
    /// overrides on top.
    pub fn workflow_config(&self) -> Result<WorkflowConfig> {
        let mut config = match &self.config {
            Some(path) => WorkflowConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => WorkflowConfig::default(),
        };

        if let Some(workdir) = &self.workdir.workdir {
            config.workdir.clone_from(workdir);
        }
        if self.continue_degraded {
            config.failure_policy = FailurePolicy::ContinueDegraded;
        }
        if let Some(key) = &self.gemini_api_key {
            config.synthesis.api_key = Some(key.clone());
        }
        if let Some(model) = &self.gemini_model {
            config.synthesis.model.clone_from(model);
        }
        if let Some(path) = &self.pdflatex_path {
            config.compilation.pdflatex_path.clone_from(path);
        }
        if let Some(path) = &self.pdftotext_path {
            config.extraction.pdftotext_path.clone_from(path);
        }
        if let Some(mb) = self.max_pdf_size_mb {
            config.extraction.max_document_mb = mb;
        }
        if let Some(secs) = self.processing_timeout_seconds {
            config.stages.set_timeout_secs(secs);
        }
        Ok(config)
    }
}

impl WorkdirArg {
    /// The given workdir, or the configured default.
    pub fn resolve(&self) -> PathBuf {
        self.workdir
            .clone()
            .unwrap_or_else(|| WorkflowConfig::default().workdir)
    }
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "pdf" || e == "txt")
}

/// Expands input paths into the documents of one run.
///
/// Files are taken as given. Directories contribute their `.pdf` and `.txt`
/// entries in name order.
pub fn collect_documents(inputs: &[PathBuf]) -> Result<DocumentBundle> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_document(path))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        bail!("No input documents found");
    }

    let mut bundle = DocumentBundle::new();
    for file in files {
        let content =
            std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
        bundle = bundle.with_document(Document::new(name, content));
    }
    Ok(bundle)
}
