//! Generation engine reached over HTTP
//!
//! `POST {base}/v1/generate` with the JSON job spec; the response body is a
//! server-push event stream, bridged into canonical events.

use crate::engine::{EngineIdentity, GenerationEngine};
use crate::error::EngineError;
use crate::outcome::{fold_events, EventStream};
use crate::spec::JobSpec;
use async_trait::async_trait;
use kiln_artifact::JobId;
use kiln_stream::bridge;
use reqwest::header::ACCEPT;
use std::time::Duration;

/// Default connect timeout for engine requests
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote engine speaking server-push events
#[derive(Debug, Clone)]
pub struct HttpEngine {
    identity: EngineIdentity,
    base_url: String,
    client: reqwest::Client,
    supports_cancel: bool,
}

impl HttpEngine {
    /// Engine at `base_url` (no trailing path)
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(Self::with_client(name, base_url, client))
    }

    /// Engine using an existing client
    #[must_use]
    pub fn with_client(name: impl Into<String>, base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            identity: EngineIdentity::new(name).with_endpoint(base_url.clone()),
            base_url,
            client,
            supports_cancel: false,
        }
    }

    /// Whether the backend exposes `POST /v1/cancel/{job}`
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, supported: bool) -> Self {
        self.supports_cancel = supported;
        self
    }

    /// Base URL
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerationEngine for HttpEngine {
    fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    async fn submit(&self, spec: JobSpec) -> Result<EventStream, EngineError> {
        let url = format!("{}/v1/generate", self.base_url);
        tracing::debug!(job = %spec.job, %url, intent = %spec.intent, "submitting job");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&spec)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(fold_events(bridge(Box::pin(response.bytes_stream()))))
    }

    async fn cancel(&self, job: JobId) {
        if !self.supports_cancel {
            return;
        }
        let url = format!("{}/v1/cancel/{job}", self.base_url);
        match self.client.post(&url).send().await {
            Ok(response) => tracing::debug!(%job, status = %response.status(), "cancel sent"),
            Err(error) => tracing::debug!(%job, %error, "cancel failed"),
        }
    }
}
