//! Engine adapter trait

use crate::error::EngineError;
use crate::outcome::EventStream;
use crate::spec::JobSpec;
use async_trait::async_trait;
use kiln_artifact::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name and location of an engine, recorded on every run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl EngineIdentity {
    /// Identity without an endpoint
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
        }
    }

    /// With endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl fmt::Display for EngineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}@{}", self.name, endpoint),
            None => f.write_str(&self.name),
        }
    }
}

/// Uniform interface to a generation backend
///
/// `submit` yields non-terminal canonical events followed by exactly one
/// [`EngineMessage::Finished`](crate::EngineMessage::Finished). An engine
/// never touches the version store.
#[async_trait]
pub trait GenerationEngine: Send + Sync + fmt::Debug {
    /// Who this engine is
    fn identity(&self) -> &EngineIdentity;

    /// Start a job
    ///
    /// # Errors
    /// Returns error if the job could not be started at all
    async fn submit(&self, spec: JobSpec) -> Result<EventStream, EngineError>;

    /// Ask the backend to abandon a job; best effort
    async fn cancel(&self, _job: JobId) {}
}
