//! Error types for Kiln Core

use crate::job::JobState;
use kiln_artifact::{JobId, ProjectId, StoreError};
use kiln_engine::EngineError;
use kiln_gate::GateError;
use std::path::PathBuf;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Another job for the project has not finished
    #[error("project {project} is busy with job {active}")]
    ProjectBusy { project: ProjectId, active: JobId },

    /// State machine violation
    #[error("illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobState, to: JobState },

    /// Version store failure
    #[error("version store error: {0}")]
    Store(#[from] StoreError),

    /// Engine setup failure
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Gate setup failure
    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Job task ended abnormally
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if the request was refused because the project is busy
    #[inline]
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::ProjectBusy { .. })
    }

    /// Check if resubmitting later might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProjectBusy { .. } => true,
            Self::Engine(e) => e.is_retryable(),
            Self::Store(e) => e.is_storage_failure(),
            Self::IllegalTransition { .. } | Self::Gate(_) | Self::Config(_) | Self::Internal(_) => {
                false
            }
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are individually valid but unusable together
    #[error("invalid config: {0}")]
    Invalid(String),
}
