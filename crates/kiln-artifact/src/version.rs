//! Immutable version snapshots
//!
//! A [`Version`] is a content-addressed snapshot of a project's file set.
//!
//! # Invariants
//! - `id` is always the hash of the version header (project, parent,
//!   files hash, job, creation time)
//! - Immutable after construction: there are no setters
//! - Restoring creates a new version; history is never rewound

use crate::files::FileSet;
use crate::hash::{ContentHash, HashError};
use crate::ids::{JobId, ProjectId, VersionId};
use crate::summary::EditSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header fields that determine the version id
#[derive(Serialize)]
struct VersionHeader<'a> {
    project: &'a ProjectId,
    parent: Option<&'a VersionId>,
    files_hash: &'a ContentHash,
    job: &'a JobId,
    created_at: &'a DateTime<Utc>,
}

/// Content-addressed snapshot of a project's artifact files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    id: VersionId,
    project: ProjectId,
    parent: Option<VersionId>,
    created_at: DateTime<Utc>,
    files_hash: ContentHash,
    files: FileSet,
    job: JobId,
    summary: EditSummary,
}

impl Version {
    /// Seal a new version
    ///
    /// `summary` is expected to be computed against the parent's files.
    ///
    /// # Errors
    /// Returns error if the header cannot be hashed
    pub fn seal(
        project: ProjectId,
        parent: Option<VersionId>,
        files: FileSet,
        job: JobId,
        summary: EditSummary,
        created_at: DateTime<Utc>,
    ) -> Result<Self, HashError> {
        let files_hash = files.content_hash();
        let id = VersionId(ContentHash::compute_serializable(&VersionHeader {
            project: &project,
            parent: parent.as_ref(),
            files_hash: &files_hash,
            job: &job,
            created_at: &created_at,
        })?);

        Ok(Self {
            id,
            project,
            parent,
            created_at,
            files_hash,
            files,
            job,
            summary,
        })
    }

    /// Version id
    #[inline]
    #[must_use]
    pub fn id(&self) -> VersionId {
        self.id
    }

    /// Owning project
    #[inline]
    #[must_use]
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Parent version, `None` for the first version of a project
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<VersionId> {
        self.parent
    }

    /// Creation time (display and tie-break order only)
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Hash of the file set alone
    #[inline]
    #[must_use]
    pub fn files_hash(&self) -> ContentHash {
        self.files_hash
    }

    /// File contents
    #[inline]
    #[must_use]
    pub fn files(&self) -> &FileSet {
        &self.files
    }

    /// Job that produced this version
    #[inline]
    #[must_use]
    pub fn job(&self) -> JobId {
        self.job
    }

    /// Stored edit summary
    #[inline]
    #[must_use]
    pub fn summary(&self) -> &EditSummary {
        &self.summary
    }

    /// Recompute hashes and compare (used after loading from disk)
    #[must_use]
    pub fn verify(&self) -> bool {
        let files_hash = self.files.content_hash();
        if files_hash != self.files_hash {
            return false;
        }
        ContentHash::compute_serializable(&VersionHeader {
            project: &self.project,
            parent: self.parent.as_ref(),
            files_hash: &files_hash,
            job: &self.job,
            created_at: &self.created_at,
        })
        .is_ok_and(|h| VersionId(h) == self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(job: JobId) -> Version {
        let files = FileSet::new().with_file("index.html", "<h1>hi</h1>").unwrap();
        let summary = EditSummary::between(None, &files);
        Version::seal(ProjectId::new("p"), None, files, job, summary, Utc::now()).unwrap()
    }

    #[test]
    fn sealed_version_verifies() {
        let v = sample(JobId::new());
        assert!(v.verify());
        assert_eq!(v.parent(), None);
    }

    #[test]
    fn same_files_different_jobs_get_distinct_ids() {
        let a = sample(JobId::new());
        let b = sample(JobId::new());
        assert_eq!(a.files_hash(), b.files_hash());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn tampered_version_fails_verification() {
        let v = sample(JobId::new());
        let mut json = serde_json::to_value(&v).unwrap();
        json["files"]["index.html"] = serde_json::json!("<h1>tampered</h1>");
        let tampered: Version = serde_json::from_value(json).unwrap();
        assert!(!tampered.verify());
    }
}
