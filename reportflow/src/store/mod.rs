//! Artifact store: the durable staging area between stages.
//!
//! Artifacts are keyed by `(run id, name)` and are immutable once written.
//! A run's namespace must be claimed with [`ArtifactStore::begin_run`]
//! before anything is written into it; claiming an existing run fails with
//! `RunAlreadyExists`, which is what makes re-running under the same
//! identifier impossible.

mod fs;
mod memory;

pub use fs::{FsArtifactStore, UNKNOWN_STAGE};
pub use memory::InMemoryArtifactStore;

use crate::core::{ArtifactRef, RunId};
use crate::errors::ReportflowError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Storage backend for run artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    /// Claims the namespace for a new run.
    ///
    /// Fails with `RunAlreadyExists` if the run was claimed before.
    async fn begin_run(&self, run_id: &RunId) -> Result<(), ReportflowError>;

    /// Writes an artifact.
    ///
    /// The payload is on durable storage when this returns. Fails with
    /// `ArtifactConflict` if `(run_id, name)` exists, whatever its payload.
    async fn put(
        &self,
        run_id: &RunId,
        name: &str,
        payload: &[u8],
        producing_stage: &str,
    ) -> Result<ArtifactRef, ReportflowError>;

    /// Reads an artifact payload. Fails with `ArtifactMissing` if absent.
    async fn get(&self, run_id: &RunId, name: &str) -> Result<Vec<u8>, ReportflowError>;

    /// Returns true if the artifact exists.
    async fn exists(&self, run_id: &RunId, name: &str) -> bool;

    /// Returns the reference recorded for an artifact.
    async fn metadata(&self, run_id: &RunId, name: &str) -> Result<ArtifactRef, ReportflowError>;

    /// Lists a run's artifacts in creation order.
    async fn list(&self, run_id: &RunId) -> Result<Vec<ArtifactRef>, ReportflowError>;

    /// Irreversibly removes every artifact of a run, and the run itself.
    async fn purge(&self, run_id: &RunId) -> Result<(), ReportflowError>;

    /// Removes a single artifact.
    ///
    /// Only the stage runner calls this, to roll back outputs it wrote
    /// during an attempt whose remaining writes failed.
    async fn discard(&self, run_id: &RunId, name: &str) -> Result<(), ReportflowError>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store implementation must share.

    use super::ArtifactStore;
    use crate::core::RunId;
    use crate::errors::ReportflowError;

    pub async fn put_then_get(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-get").unwrap();
        store.begin_run(&run).await.unwrap();

        let r = store.put(&run, "extracted-text", b"hello", "extraction").await.unwrap();
        assert_eq!(r.size_bytes, 5);
        assert_eq!(r.producing_stage, "extraction");
        assert!(store.exists(&run, "extracted-text").await);
        assert_eq!(store.get(&run, "extracted-text").await.unwrap(), b"hello");
        assert_eq!(store.metadata(&run, "extracted-text").await.unwrap().sha256, r.sha256);
    }

    pub async fn second_put_conflicts(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-conflict").unwrap();
        store.begin_run(&run).await.unwrap();

        store.put(&run, "markup-source", b"same", "markup").await.unwrap();
        let err = store.put(&run, "markup-source", b"same", "markup").await.unwrap_err();
        assert!(matches!(err, ReportflowError::ArtifactConflict { .. }));
        let err = store.put(&run, "markup-source", b"different", "markup").await.unwrap_err();
        assert!(matches!(err, ReportflowError::ArtifactConflict { .. }));
        assert_eq!(store.get(&run, "markup-source").await.unwrap(), b"same");
    }

    pub async fn missing_artifact(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-missing").unwrap();
        store.begin_run(&run).await.unwrap();

        assert!(!store.exists(&run, "final-document").await);
        let err = store.get(&run, "final-document").await.unwrap_err();
        assert!(matches!(err, ReportflowError::ArtifactMissing { .. }));
    }

    pub async fn begin_run_twice(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-twice").unwrap();
        store.begin_run(&run).await.unwrap();
        let err = store.begin_run(&run).await.unwrap_err();
        assert!(matches!(err, ReportflowError::RunAlreadyExists { .. }));
    }

    pub async fn runs_are_isolated(store: &dyn ArtifactStore) {
        let a = RunId::parse("contract-a").unwrap();
        let b = RunId::parse("contract-b").unwrap();
        store.begin_run(&a).await.unwrap();
        store.begin_run(&b).await.unwrap();

        store.put(&a, "extracted-text", b"from a", "extraction").await.unwrap();
        assert!(!store.exists(&b, "extracted-text").await);
        store.put(&b, "extracted-text", b"from b", "extraction").await.unwrap();
        assert_eq!(store.get(&a, "extracted-text").await.unwrap(), b"from a");
    }

    pub async fn list_and_purge(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-list").unwrap();
        store.begin_run(&run).await.unwrap();

        store.put(&run, "raw-input-set", b"1", "input").await.unwrap();
        store.put(&run, "extracted-text", b"22", "extraction").await.unwrap();
        let names: Vec<_> = store.list(&run).await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["raw-input-set", "extracted-text"]);

        store.purge(&run).await.unwrap();
        assert!(!store.exists(&run, "raw-input-set").await);
        // A purged run id may be claimed again.
        store.begin_run(&run).await.unwrap();
        assert!(store.list(&run).await.unwrap().is_empty());
    }

    pub async fn discard_removes_only_named(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-discard").unwrap();
        store.begin_run(&run).await.unwrap();

        store.put(&run, "a", b"1", "s").await.unwrap();
        store.put(&run, "b", b"2", "s").await.unwrap();
        store.discard(&run, "a").await.unwrap();
        assert!(!store.exists(&run, "a").await);
        assert!(store.exists(&run, "b").await);
        // Discarding twice is harmless.
        store.discard(&run, "a").await.unwrap();
    }

    pub async fn put_requires_claimed_run(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-unclaimed").unwrap();
        let err = store.put(&run, "a", b"1", "s").await.unwrap_err();
        assert!(matches!(err, ReportflowError::RunNotFound { .. }));
    }

    pub async fn rejects_invalid_names(store: &dyn ArtifactStore) {
        let run = RunId::parse("contract-names").unwrap();
        store.begin_run(&run).await.unwrap();
        let err = store.put(&run, "../escape", b"1", "s").await.unwrap_err();
        assert!(matches!(err, ReportflowError::InvalidKey { .. }));
    }
}
