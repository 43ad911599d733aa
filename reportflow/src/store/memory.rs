//! In-memory artifact store.

use super::ArtifactStore;
use crate::core::{validate_key, ArtifactRef, RunId};
use crate::errors::ReportflowError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RunEntry {
    // Creation order.
    artifacts: Vec<(ArtifactRef, Arc<Vec<u8>>)>,
}

impl RunEntry {
    fn find(&self, name: &str) -> Option<&(ArtifactRef, Arc<Vec<u8>>)> {
        self.artifacts.iter().find(|(r, _)| r.name == name)
    }
}

/// Artifact store held entirely in memory.
///
/// Same semantics as [`super::FsArtifactStore`] minus durability; used by
/// tests and by embedders that persist the final document themselves.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    runs: RwLock<HashMap<RunId, RunEntry>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs currently claimed.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn begin_run(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        let mut runs = self.runs.write();
        if runs.contains_key(run_id) {
            return Err(ReportflowError::run_already_exists(run_id.as_str()));
        }
        runs.insert(run_id.clone(), RunEntry::default());
        Ok(())
    }

    async fn put(
        &self,
        run_id: &RunId,
        name: &str,
        payload: &[u8],
        producing_stage: &str,
    ) -> Result<ArtifactRef, ReportflowError> {
        validate_key(name)?;
        let mut runs = self.runs.write();
        let entry = runs.get_mut(run_id).ok_or_else(|| ReportflowError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        if entry.find(name).is_some() {
            return Err(ReportflowError::artifact_conflict(run_id.as_str(), name));
        }
        let reference = ArtifactRef::describe(run_id, name, producing_stage, payload);
        entry
            .artifacts
            .push((reference.clone(), Arc::new(payload.to_vec())));
        Ok(reference)
    }

    async fn get(&self, run_id: &RunId, name: &str) -> Result<Vec<u8>, ReportflowError> {
        self.runs
            .read()
            .get(run_id)
            .and_then(|entry| entry.find(name))
            .map(|(_, payload)| payload.as_ref().clone())
            .ok_or_else(|| ReportflowError::artifact_missing(run_id.as_str(), name))
    }

    async fn exists(&self, run_id: &RunId, name: &str) -> bool {
        self.runs
            .read()
            .get(run_id)
            .is_some_and(|entry| entry.find(name).is_some())
    }

    async fn metadata(&self, run_id: &RunId, name: &str) -> Result<ArtifactRef, ReportflowError> {
        self.runs
            .read()
            .get(run_id)
            .and_then(|entry| entry.find(name))
            .map(|(reference, _)| reference.clone())
            .ok_or_else(|| ReportflowError::artifact_missing(run_id.as_str(), name))
    }

    async fn list(&self, run_id: &RunId) -> Result<Vec<ArtifactRef>, ReportflowError> {
        Ok(self
            .runs
            .read()
            .get(run_id)
            .map(|entry| entry.artifacts.iter().map(|(r, _)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn purge(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        self.runs.write().remove(run_id);
        Ok(())
    }

    async fn discard(&self, run_id: &RunId, name: &str) -> Result<(), ReportflowError> {
        if let Some(entry) = self.runs.write().get_mut(run_id) {
            entry.artifacts.retain(|(r, _)| r.name != name);
        }
        Ok(())
    }
}
