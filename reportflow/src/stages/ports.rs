//! Read-only inputs handed to a collaborator and the products it returns.

use crate::errors::CollaboratorError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only view of a stage's declared input artifacts.
///
/// Payloads are shared, never copied per attempt, and cannot be mutated by
/// the collaborator.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    artifacts: BTreeMap<String, Arc<[u8]>>,
}

impl StageInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input payload.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.insert(name, payload);
        self
    }

    /// Adds an input payload in place.
    pub fn insert(&mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.artifacts
            .insert(name.into(), Arc::from(payload.into().into_boxed_slice()));
    }

    /// Returns the payload of a declared input.
    ///
    /// A name the stage did not declare is a collaborator bug and surfaces
    /// as a permanent error.
    pub fn bytes(&self, name: &str) -> Result<&[u8], CollaboratorError> {
        self.artifacts
            .get(name)
            .map(|payload| &**payload)
            .ok_or_else(|| CollaboratorError::permanent(format!("input '{name}' was not provided")))
    }

    /// Returns the payload of a declared input as UTF-8 text.
    pub fn text(&self, name: &str) -> Result<&str, CollaboratorError> {
        std::str::from_utf8(self.bytes(name)?).map_err(|e| {
            CollaboratorError::permanent(format!("input '{name}' is not valid UTF-8: {e}"))
        })
    }

    /// Names of the inputs, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Output payloads returned by a successful collaborator call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageProducts {
    artifacts: BTreeMap<String, Vec<u8>>,
}

impl StageProducts {
    /// Creates an empty product set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.insert(name, payload);
        self
    }

    /// Adds a product in place, replacing any earlier payload of that name.
    pub fn insert(&mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.artifacts.insert(name.into(), payload.into());
    }

    /// Returns a product payload.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.artifacts.get(name).map(Vec::as_slice)
    }

    /// Removes and returns a product payload.
    pub fn take(&mut self, name: &str) -> Option<Vec<u8>> {
        self.artifacts.remove(name)
    }

    /// Returns true if a product of that name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    /// Names of the products, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    /// Number of products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Returns true if there are no products.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Consumes the set, yielding `(name, payload)` pairs sorted by name.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Vec<u8>)> {
        self.artifacts.into_iter()
    }
}
