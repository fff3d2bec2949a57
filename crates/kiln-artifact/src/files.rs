//! Artifact file sets
//!
//! A [`FileSet`] is the complete set of files making up one generated
//! artifact (for example `index.html`, `game.js`, `style.css`). Paths are
//! kept sorted so hashing and diffing are deterministic.

use crate::error::ArtifactError;
use crate::hash::{ContentHash, FieldHasher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered map of relative path to UTF-8 file content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: BTreeMap<String, String>,
}

impl FileSet {
    /// Create an empty file set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    ///
    /// # Errors
    /// Returns error if the path is empty, absolute or escapes the root
    pub fn with_file(
        mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, ArtifactError> {
        self.insert(path, content)?;
        Ok(self)
    }

    /// Insert or replace a file
    ///
    /// # Errors
    /// Returns error if the path is empty, absolute or escapes the root
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Option<String>, ArtifactError> {
        let path = path.into();
        validate_path(&path)?;
        Ok(self.files.insert(path, content.into()))
    }

    /// Content of one file
    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Iterate `(path, content)` in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Number of files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when no files are present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total content size in bytes
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.files.values().map(String::len).sum()
    }

    /// Deterministic content address of the whole set
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = FieldHasher::new();
        for (path, content) in &self.files {
            hasher.field(path.as_bytes()).field(content.as_bytes());
        }
        hasher.finish()
    }

    /// Validate every path (used after deserializing untrusted input)
    ///
    /// # Errors
    /// Returns the first invalid path
    pub fn validate(&self) -> Result<(), ArtifactError> {
        self.files.keys().try_for_each(|p| validate_path(p))
    }
}

impl FromIterator<(String, String)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

fn validate_path(path: &str) -> Result<(), ArtifactError> {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return Err(ArtifactError::InvalidPath(path.to_string()));
    }
    if path.split(['/', '\\']).any(|seg| seg == ".." || seg.is_empty()) {
        return Err(ArtifactError::InvalidPath(path.to_string()));
    }
    Ok(())
}
