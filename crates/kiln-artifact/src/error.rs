//! Error types for artifacts and the version store

use crate::ids::{ProjectId, VersionId};

/// Errors building artifact values
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// File path is empty, absolute, or escapes the artifact root
    #[error("invalid artifact path: {0:?}")]
    InvalidPath(String),

    /// Hash computation failed
    #[error("hash error: {0}")]
    Hash(#[from] crate::hash::HashError),
}

/// Version store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested version does not exist
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// The version exists but belongs to another project
    #[error("version {version} does not belong to project {project}")]
    WrongProject {
        project: ProjectId,
        version: VersionId,
    },

    /// Commit parent does not match the current head
    #[error("stale parent for {project}: head is {head:?}, commit named {parent:?}")]
    StaleParent {
        project: ProjectId,
        head: Option<VersionId>,
        parent: Option<VersionId>,
    },

    /// Stored data failed integrity verification
    #[error("corrupt version record {version}: {reason}")]
    Corrupt { version: String, reason: String },

    /// Invalid artifact content
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Filesystem error
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding error
    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    /// True for storage-layer failures (as opposed to caller mistakes)
    #[inline]
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Encoding(_) | Self::Corrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    #[test]
    fn storage_failures_are_classified() {
        let io = StoreError::Io(std::io::Error::other("disk full"));
        assert!(io.is_storage_failure());

        let missing = StoreError::VersionNotFound(VersionId(ContentHash::compute(b"v")));
        assert!(!missing.is_storage_failure());
        assert!(missing.to_string().contains("version not found"));
    }
}
