//! Filesystem-backed artifact store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<run_id>/artifacts/<name>      payload
//! <root>/<run_id>/meta/<name>.json      ArtifactRef
//! <root>/<run_id>/.staging/             temp files, same filesystem
//! ```
//!
//! A payload is written to `.staging`, synced, then hard-linked to its final
//! name. `link` refuses to replace an existing file, so a concurrent or stale
//! second write of the same name surfaces as `ArtifactConflict` instead of a
//! silent overwrite.
//!
//! Metadata lands after the payload. A payload without metadata (a crash
//! between the two) is still listed, with its reference rebuilt from the
//! payload itself.

use super::ArtifactStore;
use crate::core::{validate_key, ArtifactRef, RunId};
use crate::errors::ReportflowError;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const ARTIFACTS_DIR: &str = "artifacts";
const META_DIR: &str = "meta";
const STAGING_DIR: &str = ".staging";
/// Producing stage recorded for a reference rebuilt from a bare payload.
pub const UNKNOWN_STAGE: &str = "unknown";

/// Durable artifact store rooted at a working directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything belonging to one run.
    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    /// Path where an artifact payload lives (whether or not it exists).
    #[must_use]
    pub fn artifact_path(&self, run_id: &RunId, name: &str) -> PathBuf {
        self.run_dir(run_id).join(ARTIFACTS_DIR).join(name)
    }

    fn meta_path(&self, run_id: &RunId, name: &str) -> PathBuf {
        self.run_dir(run_id).join(META_DIR).join(format!("{name}.json"))
    }

    fn staging_path(&self, run_id: &RunId, name: &str) -> PathBuf {
        self.run_dir(run_id)
            .join(STAGING_DIR)
            .join(format!("{name}.{}.tmp", Uuid::new_v4().simple()))
    }

    async fn ensure_run(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        match fs::metadata(self.run_dir(run_id).join(ARTIFACTS_DIR)).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(ReportflowError::RunNotFound {
                run_id: run_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), ReportflowError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn sync_dir(path: &Path) -> Result<(), ReportflowError> {
        // Directory fsync is not available everywhere; treat it as best effort.
        match fs::File::open(path).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(path = %path.display(), error = %e, "Directory sync unsupported");
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn recover_reference(
        &self,
        run_id: &RunId,
        name: &str,
    ) -> Result<ArtifactRef, ReportflowError> {
        let path = self.artifact_path(run_id, name);
        let payload = match fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(ReportflowError::artifact_missing(run_id.as_str(), name));
            }
            Err(e) => return Err(e.into()),
        };
        let mut reference =
            ArtifactRef::describe(run_id, name, UNKNOWN_STAGE, &payload).with_location(&path);
        if let Ok(modified) = fs::metadata(&path).await.and_then(|m| m.modified()) {
            reference.created_at = modified.into();
        }
        warn!(run_id = %run_id, artifact = name, "Artifact metadata missing, rebuilt from payload");
        Ok(reference)
    }

    async fn remove_if_present(path: &Path) -> Result<(), ReportflowError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn begin_run(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        validate_key(run_id.as_str())?;
        fs::create_dir_all(&self.root).await?;

        let run_dir = self.run_dir(run_id);
        match fs::create_dir(&run_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                return Err(ReportflowError::run_already_exists(run_id.as_str()));
            }
            Err(e) => return Err(e.into()),
        }
        for sub in [ARTIFACTS_DIR, META_DIR, STAGING_DIR] {
            fs::create_dir(run_dir.join(sub)).await?;
        }
        Self::sync_dir(&self.root).await?;
        debug!(run_id = %run_id, dir = %run_dir.display(), "Claimed run directory");
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
        self.ensure_run(run_id).await?;

        let final_path = self.artifact_path(run_id, name);
        if fs::try_exists(&final_path).await? {
            return Err(ReportflowError::artifact_conflict(run_id.as_str(), name));
        }

        let reference = ArtifactRef::describe(run_id, name, producing_stage, payload)
            .with_location(&final_path);
        let meta_bytes = serde_json::to_vec_pretty(&reference)?;

        let staged_payload = self.staging_path(run_id, name);
        let staged_meta = self.staging_path(run_id, &format!("{name}.meta"));
        Self::write_synced(&staged_payload, payload).await?;
        Self::write_synced(&staged_meta, &meta_bytes).await?;

        let claimed = fs::hard_link(&staged_payload, &final_path).await;
        Self::remove_if_present(&staged_payload).await?;
        match claimed {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                Self::remove_if_present(&staged_meta).await?;
                return Err(ReportflowError::artifact_conflict(run_id.as_str(), name));
            }
            Err(e) => {
                Self::remove_if_present(&staged_meta).await?;
                return Err(e.into());
            }
        }

        fs::rename(&staged_meta, self.meta_path(run_id, name)).await?;
        Self::sync_dir(&self.run_dir(run_id).join(ARTIFACTS_DIR)).await?;
        Self::sync_dir(&self.run_dir(run_id).join(META_DIR)).await?;

        debug!(
            run_id = %run_id,
            artifact = name,
            size_bytes = reference.size_bytes,
            "Stored artifact"
        );
        Ok(reference)
    }

    async fn get(&self, run_id: &RunId, name: &str) -> Result<Vec<u8>, ReportflowError> {
        validate_key(name)?;
        match fs::read(self.artifact_path(run_id, name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(ReportflowError::artifact_missing(run_id.as_str(), name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, run_id: &RunId, name: &str) -> bool {
        if validate_key(name).is_err() {
            return false;
        }
        fs::try_exists(self.artifact_path(run_id, name))
            .await
            .unwrap_or(false)
    }

    async fn metadata(&self, run_id: &RunId, name: &str) -> Result<ArtifactRef, ReportflowError> {
        validate_key(name)?;
        match fs::read(self.meta_path(run_id, name)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => self.recover_reference(run_id, name).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, run_id: &RunId) -> Result<Vec<ArtifactRef>, ReportflowError> {
        let artifacts_dir = self.run_dir(run_id).join(ARTIFACTS_DIR);
        let mut entries = match fs::read_dir(&artifacts_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut refs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.metadata(run_id, &name).await {
                Ok(reference) => refs.push(reference),
                Err(e) => warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "Skipping unreadable artifact metadata"
                ),
            }
        }
        refs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(refs)
    }

    async fn purge(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        validate_key(run_id.as_str())?;
        match fs::remove_dir_all(self.run_dir(run_id)).await {
            Ok(()) => {
                debug!(run_id = %run_id, "Purged run");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn discard(&self, run_id: &RunId, name: &str) -> Result<(), ReportflowError> {
        validate_key(name)?;
        Self::remove_if_present(&self.meta_path(run_id, name)).await?;
        Self::remove_if_present(&self.artifact_path(run_id, name)).await
    }
}
