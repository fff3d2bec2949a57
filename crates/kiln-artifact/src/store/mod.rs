//! Append-only version store
//!
//! The store keeps every committed [`Version`] of every project and a
//! per-project head pointer. Versions are never mutated or deleted.
//!
//! # Concurrency
//! `commit` checks that the named parent equals the current head and fails
//! with [`StoreError::StaleParent`] otherwise. Callers are expected to hold
//! the per-project job lock while committing, which makes the head pointer
//! effectively single-writer.

mod fs;
mod memory;

pub use fs::FsVersionStore;
pub use memory::InMemoryVersionStore;

use crate::error::StoreError;
use crate::files::FileSet;
use crate::ids::{JobId, ProjectId, VersionId};
use crate::summary::EditSummary;
use crate::version::Version;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;

/// A version about to be committed
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Target project
    pub project: ProjectId,
    /// Expected current head
    pub parent: Option<VersionId>,
    /// Complete file set of the new version
    pub files: FileSet,
    /// Originating job
    pub job: JobId,
    /// Optional free-text description for the edit summary
    pub description: Option<String>,
}

impl NewVersion {
    /// Create a commit request
    #[inline]
    #[must_use]
    pub fn new(project: ProjectId, parent: Option<VersionId>, files: FileSet, job: JobId) -> Self {
        Self {
            project,
            parent,
            files,
            job,
            description: None,
        }
    }

    /// With edit description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Seal into a [`Version`], computing the summary against the parent files
    pub(crate) fn seal(self, parent_files: Option<&FileSet>) -> Result<Version, StoreError> {
        self.files.validate()?;
        let mut summary = EditSummary::between(parent_files, &self.files);
        if let Some(description) = self.description {
            summary = summary.with_description(description);
        }
        Version::seal(
            self.project,
            self.parent,
            self.files,
            self.job,
            summary,
            Utc::now(),
        )
        .map_err(|e| StoreError::Artifact(e.into()))
    }
}

/// Version history storage
#[async_trait]
pub trait VersionStore: Send + Sync + std::fmt::Debug {
    /// Commit a new version on top of `new.parent`
    ///
    /// # Errors
    /// - `StaleParent` if `new.parent` is not the current head
    /// - storage errors from the backend
    async fn commit(&self, new: NewVersion) -> Result<VersionId, StoreError>;

    /// All versions of a project in history order (see [`order_history`])
    async fn list(&self, project: &ProjectId) -> Result<Vec<Version>, StoreError>;

    /// Look up a version by id
    async fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError>;

    /// Current head of a project, `None` before the first commit
    async fn head(&self, project: &ProjectId) -> Result<Option<VersionId>, StoreError>;

    /// Edit summary of a version against its parent
    async fn diff(&self, id: VersionId) -> Result<EditSummary, StoreError> {
        self.get(id)
            .await?
            .map(|v| v.summary().clone())
            .ok_or(StoreError::VersionNotFound(id))
    }

    /// Create a new head version copying the files of `version`
    ///
    /// Nothing is deleted or rewritten; the restored content becomes a child
    /// of the current head.
    async fn restore(
        &self,
        project: &ProjectId,
        version: VersionId,
        job: JobId,
    ) -> Result<VersionId, StoreError> {
        let source = self
            .get(version)
            .await?
            .ok_or(StoreError::VersionNotFound(version))?;
        if source.project() != project {
            return Err(StoreError::WrongProject {
                project: project.clone(),
                version,
            });
        }
        let head = self.head(project).await?;
        let new = NewVersion::new(project.clone(), head, source.files().clone(), job)
            .with_description(format!("restored from {}", version.short()));
        self.commit(new).await
    }
}

/// Order versions by parent pointer, using creation time as tie-break
///
/// Each version is placed after its parent (depth order); versions at the
/// same depth (branches) are ordered by creation time, then id. Versions
/// whose parent is missing from the input are treated as roots.
#[must_use]
pub fn order_history(versions: Vec<Version>) -> Vec<Version> {
    let parents: HashMap<VersionId, Option<VersionId>> =
        versions.iter().map(|v| (v.id(), v.parent())).collect();
    let mut depth: HashMap<VersionId, usize> = HashMap::with_capacity(versions.len());

    for v in &versions {
        let mut chain = Vec::new();
        let mut cursor = Some(v.id());
        let mut base = 0;
        while let Some(id) = cursor {
            if let Some(d) = depth.get(&id) {
                base = *d + 1;
                break;
            }
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            cursor = parents.get(&id).copied().flatten().filter(|p| parents.contains_key(p));
        }
        for (offset, id) in chain.into_iter().rev().enumerate() {
            depth.insert(id, base + offset);
        }
    }

    let mut ordered = versions;
    ordered.sort_by(|a, b| {
        depth[&a.id()]
            .cmp(&depth[&b.id()])
            .then(a.created_at().cmp(&b.created_at()))
            .then(a.id().cmp(&b.id()))
    });
    ordered
}
