//! Artifact names, references and the raw document bundle.

use super::RunId;
use crate::errors::ReportflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// The set of raw input documents.
pub const RAW_INPUT_SET: &str = "raw-input-set";
/// Combined text extracted from every input document.
pub const EXTRACTED_TEXT: &str = "extracted-text";
/// Narrative report produced by synthesis.
pub const SYNTHESIZED_REPORT: &str = "synthesized-report";
/// Typesetting source produced by markup generation.
pub const MARKUP_SOURCE: &str = "markup-source";
/// The compiled final document.
pub const FINAL_DOCUMENT: &str = "final-document";

/// Producing-stage label recorded for artifacts supplied to a run up front.
pub const INPUT_STAGE: &str = "input";

/// Checks that `key` can be used as an artifact name or run identifier.
///
/// Keys become path components in the filesystem store, so they are limited
/// to ASCII alphanumerics, `-`, `_` and `.`, and may not start with `.`.
pub fn validate_key(key: &str) -> Result<(), ReportflowError> {
    if key.is_empty() {
        return Err(ReportflowError::invalid_key(key, "must not be empty"));
    }
    if key.starts_with('.') {
        return Err(ReportflowError::invalid_key(key, "must not start with '.'"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(ReportflowError::invalid_key(
            key,
            format!("contains unsupported character {c:?}"),
        ));
    }
    Ok(())
}

/// Hex-encoded SHA-256 digest of a payload.
#[must_use]
pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Reference to an artifact held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// The run that owns the artifact.
    pub run_id: RunId,
    /// Logical name, unique within the run.
    pub name: String,
    /// Stage that produced the artifact.
    pub producing_stage: String,
    /// When the artifact was written.
    pub created_at: DateTime<Utc>,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Hex SHA-256 digest of the payload.
    pub sha256: String,
    /// Payload location on durable storage, if the store has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
}

impl ArtifactRef {
    /// Describes a payload about to be written.
    #[must_use]
    pub fn describe(
        run_id: &RunId,
        name: impl Into<String>,
        producing_stage: impl Into<String>,
        payload: &[u8],
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            name: name.into(),
            producing_stage: producing_stage.into(),
            created_at: Utc::now(),
            size_bytes: payload.len() as u64,
            sha256: sha256_hex(payload),
            location: None,
        }
    }

    /// Sets the payload location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// One raw input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Original file name, e.g. `discharge-summary.pdf`.
    pub name: String,
    /// Base64 encoded content.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl Document {
    /// Creates a document.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Lower-cased file extension, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// The payload stored under [`RAW_INPUT_SET`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentBundle {
    /// Documents in submission order.
    pub documents: Vec<Document>,
}

impl DocumentBundle {
    /// Creates an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document.
    #[must_use]
    pub fn with_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if the bundle holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Serializes the bundle to its artifact payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, ReportflowError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a bundle from an artifact payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ReportflowError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
