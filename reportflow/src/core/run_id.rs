//! Run identifiers.

use super::artifact::validate_key;
use crate::errors::ReportflowError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one end-to-end run; partitions the artifact store.
///
/// Generated identifiers are timestamp-derived with a random suffix, e.g.
/// `20261018T093000Z-1a2b3c4d`, so they sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generates a fresh run identifier.
    #[must_use]
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{stamp}-{}", &suffix[..8]))
    }

    /// Parses a caller-supplied run identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, ReportflowError> {
        let value = value.into();
        validate_key(&value)?;
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
