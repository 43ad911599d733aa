//! # Reportflow
//!
//! A staged document-to-report pipeline orchestrator.
//!
//! Reportflow turns a set of raw medical documents into one typeset report
//! by running a fixed sequence of stages, each delegating to an external
//! collaborator:
//!
//! - **Extraction**: raw documents to one combined text payload
//! - **Synthesis**: combined text to a structured narrative report
//! - **Markup**: report text to LaTeX source
//! - **Compilation**: LaTeX source to the final PDF
//!
//! Stages hand off through an immutable, run-scoped artifact store. Each
//! stage runs under its own timeout and retry budget, and every run ends
//! with an execution report recording what happened to each stage.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reportflow::prelude::*;
//!
//! let config = WorkflowConfig::from_json_file("reportflow.json")?;
//! let store = Arc::new(FsArtifactStore::new(&config.workdir));
//! let pipeline = standard_pipeline(&config)?;
//!
//! let report = Orchestrator::from_config(store, &config)
//!     .with_journal(&config.workdir)
//!     .execute_new(&pipeline, RunInputs::from_bundle(&bundle)?)
//!     .await?;
//! std::process::exit(report.status.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    #[cfg(feature = "gemini")]
    pub use crate::collaborators::{standard_pipeline, GeminiSynthesizer};
    pub use crate::collaborators::{LatexMarkupGenerator, PdfLatexCompiler, TextExtractor};
    pub use crate::config::{FailurePolicy, StagePolicies, StagePolicy, WorkflowConfig};
    pub use crate::core::{
        ArtifactRef, Document, DocumentBundle, RunId, RunStatus, StageKind, StageStatus,
    };
    pub use crate::errors::{
        CollaboratorError, ErrorDetail, ErrorKind, PipelineValidationError, ReportflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        Orchestrator, Pipeline, PipelineBuilder, RetryPolicy, RunInputs, StageOutcome,
        StageRunner,
    };
    pub use crate::report::{ExecutionReport, RunJournal, StageRecord};
    pub use crate::stages::{Collaborator, StageDefinition, StageInputs, StageProducts};
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
}
