//! Engine errors

use crate::outcome::{EngineMessage, EngineOutcome, EventStream, FailureCode};
use futures::stream::{self, StreamExt};
use std::time::Duration;

/// Errors raised while submitting a job to an engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request could not be sent or the connection dropped
    #[error("engine request failed: {0}")]
    Request(String),

    /// Engine answered with a non-success status
    #[error("engine rejected job with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Submission did not finish before the deadline
    #[error("engine timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    /// Engine is misconfigured
    #[error("engine configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Failure code reported to the caller
    #[inline]
    #[must_use]
    pub fn code(&self) -> FailureCode {
        match self {
            Self::Timeout { .. } => FailureCode::Timeout,
            Self::Request(_) | Self::Rejected { .. } => FailureCode::EngineRejected,
            Self::Config(_) => FailureCode::Internal,
        }
    }

    /// Check if resubmitting might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::Config(_) => false,
        }
    }

    /// A stream holding only the corresponding failure
    #[must_use]
    pub fn into_stream(self) -> EventStream {
        let outcome = EngineOutcome::failure(self.code(), self.to_string());
        stream::once(async move { EngineMessage::Finished(outcome) }).boxed()
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error.to_string())
    }
}
