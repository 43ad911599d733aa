//! Core domain model types for reportflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Well-known artifact names and artifact references
//! - Run identifiers
//! - Stage kind, stage status and run status enums

mod artifact;
mod run_id;
mod status;

pub use artifact::{
    sha256_hex, validate_key, ArtifactRef, Document, DocumentBundle, EXTRACTED_TEXT,
    FINAL_DOCUMENT, INPUT_STAGE, MARKUP_SOURCE, RAW_INPUT_SET, SYNTHESIZED_REPORT,
};
pub use run_id::RunId;
pub use status::{RunStatus, StageKind, StageStatus};
