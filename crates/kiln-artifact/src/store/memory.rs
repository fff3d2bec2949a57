//! In-memory version store

use super::{order_history, NewVersion, VersionStore};
use crate::error::StoreError;
use crate::ids::{ProjectId, VersionId};
use crate::version::Version;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct ProjectHistory {
    versions: Vec<VersionId>,
    head: Option<VersionId>,
}

#[derive(Debug, Default)]
struct State {
    projects: HashMap<ProjectId, ProjectHistory>,
    versions: HashMap<VersionId, Arc<Version>>,
}

/// Version store backed by process memory
///
/// Suitable for tests and single-process deployments; history is lost on
/// restart. See [`super::FsVersionStore`] for the durable variant.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    state: RwLock<State>,
}

impl InMemoryVersionStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of versions across all projects
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.state.read().versions.len()
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn commit(&self, new: NewVersion) -> Result<VersionId, StoreError> {
        let mut state = self.state.write();
        let head = state.projects.get(&new.project).and_then(|h| h.head);
        if head != new.parent {
            return Err(StoreError::StaleParent {
                project: new.project,
                head,
                parent: new.parent,
            });
        }

        let parent_files = head.and_then(|id| state.versions.get(&id)).map(Arc::clone);
        let version = new.seal(parent_files.as_deref().map(Version::files))?;
        let id = version.id();

        let history = state.projects.entry(version.project().clone()).or_default();
        history.versions.push(id);
        history.head = Some(id);
        state.versions.insert(id, Arc::new(version));

        tracing::debug!(version = %id.short(), "committed version");
        Ok(id)
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<Version>, StoreError> {
        let state = self.state.read();
        let versions = state
            .projects
            .get(project)
            .map(|h| {
                h.versions
                    .iter()
                    .filter_map(|id| state.versions.get(id))
                    .map(|v| Version::clone(v))
                    .collect()
            })
            .unwrap_or_default();
        Ok(order_history(versions))
    }

    async fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError> {
        Ok(self.state.read().versions.get(&id).map(|v| Version::clone(v)))
    }

    async fn head(&self, project: &ProjectId) -> Result<Option<VersionId>, StoreError> {
        Ok(self.state.read().projects.get(project).and_then(|h| h.head))
    }
}
