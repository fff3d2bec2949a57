//! Kiln Artifact - versioned, content-addressed artifact history
//!
//! # Core Concepts
//!
//! - [`FileSet`]: the files making up one generated artifact
//! - [`ContentHash`]: 32-byte Blake3 hash used for content addressing
//! - [`Version`]: immutable snapshot of a project's files with parent link
//! - [`VersionStore`]: append-only history with commit, list, diff, restore
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_artifact::{FileSet, InMemoryVersionStore, JobId, NewVersion, ProjectId, VersionStore};
//!
//! let store = InMemoryVersionStore::new();
//! let files = FileSet::new().with_file("index.html", "<canvas></canvas>")?;
//! let project = ProjectId::new("breakout");
//! let v1 = store.commit(NewVersion::new(project.clone(), None, files, JobId::new())).await?;
//! let v2 = store.restore(&project, v1, JobId::new()).await?;
//! assert_ne!(v1, v2);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod files;
mod hash;
mod ids;
mod summary;
mod version;

pub mod store;

pub use error::{ArtifactError, StoreError};
pub use files::FileSet;
pub use hash::{ContentHash, FieldHasher, HashError};
pub use ids::{CallerId, JobId, ProjectId, VersionId};
pub use store::{order_history, FsVersionStore, InMemoryVersionStore, NewVersion, VersionStore};
pub use summary::EditSummary;
pub use version::Version;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
