//! JSON-on-disk version store
//!
//! Layout under the root directory:
//!
//! ```text
//! versions/<version-id>.json       one sealed Version per file
//! projects/<hex(project)>/HEAD     current head id
//! ```
//!
//! Files are written to a temporary name and renamed into place, so a crash
//! never leaves a half-written version or head behind. Replacing HEAD is the
//! commit point: history is the parent chain reachable from HEAD, so a
//! version file written by a commit that never moved HEAD is not history.

use super::{order_history, NewVersion, VersionStore};
use crate::error::StoreError;
use crate::ids::{ProjectId, VersionId};
use crate::version::Version;
use async_trait::async_trait;
use moka::future::Cache;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Durable version store keeping one JSON document per version
#[derive(Debug)]
pub struct FsVersionStore {
    root: PathBuf,
    cache: Cache<VersionId, Arc<Version>>,
    write_lock: Mutex<()>,
}

impl FsVersionStore {
    /// Open (and create if needed) a store rooted at `root`
    ///
    /// # Errors
    /// Returns error if the directories cannot be created
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("versions")).await?;
        tokio::fs::create_dir_all(root.join("projects")).await?;
        Ok(Self {
            root,
            cache: Cache::new(1_024),
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_path(&self, id: VersionId) -> PathBuf {
        self.root.join("versions").join(format!("{id}.json"))
    }

    fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.root
            .join("projects")
            .join(hex::encode(project.as_str().as_bytes()))
    }

    async fn load(&self, id: VersionId) -> Result<Option<Arc<Version>>, StoreError> {
        if let Some(v) = self.cache.get(&id).await {
            return Ok(Some(v));
        }
        let bytes = match tokio::fs::read(self.version_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let version: Version = serde_json::from_slice(&bytes)?;
        if version.id() != id || !version.verify() {
            return Err(StoreError::Corrupt {
                version: id.to_string(),
                reason: "hash verification failed".to_string(),
            });
        }
        let version = Arc::new(version);
        self.cache.insert(id, Arc::clone(&version)).await;
        Ok(Some(version))
    }

    async fn read_head(&self, project: &ProjectId) -> Result<Option<VersionId>, StoreError> {
        match tokio::fs::read_to_string(self.project_dir(project).join("HEAD")).await {
            Ok(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: crate::hash::HashError| StoreError::Corrupt {
                    version: format!("HEAD of {project}"),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl VersionStore for FsVersionStore {
    async fn commit(&self, new: NewVersion) -> Result<VersionId, StoreError> {
        let _guard = self.write_lock.lock().await;

        let head = self.read_head(&new.project).await?;
        if head != new.parent {
            return Err(StoreError::StaleParent {
                project: new.project,
                head,
                parent: new.parent,
            });
        }
        let parent = match head {
            Some(id) => Some(self.load(id).await?.ok_or(StoreError::VersionNotFound(id))?),
            None => None,
        };

        let version = new.seal(parent.as_deref().map(Version::files))?;
        let id = version.id();
        let dir = self.project_dir(version.project());
        tokio::fs::create_dir_all(&dir).await?;

        write_atomic(&self.version_path(id), &serde_json::to_vec_pretty(&version)?).await?;
        write_atomic(&dir.join("HEAD"), id.to_string().as_bytes()).await?;
        self.cache.insert(id, Arc::new(version)).await;

        tracing::debug!(version = %id.short(), root = %self.root.display(), "committed version to disk");
        Ok(id)
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<Version>, StoreError> {
        let mut versions = Vec::new();
        let mut next = self.read_head(project).await?;
        while let Some(id) = next {
            let version = self.load(id).await?.ok_or(StoreError::VersionNotFound(id))?;
            if version.project() != project {
                return Err(StoreError::Corrupt {
                    version: id.to_string(),
                    reason: format!("belongs to {}, reached from {project}", version.project()),
                });
            }
            next = version.parent();
            versions.push(Version::clone(&version));
        }
        Ok(order_history(versions))
    }

    async fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError> {
        Ok(self.load(id).await?.map(|v| Version::clone(&v)))
    }

    async fn head(&self, project: &ProjectId) -> Result<Option<VersionId>, StoreError> {
        self.read_head(project).await
    }
}
