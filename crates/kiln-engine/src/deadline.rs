//! Hard deadline around an engine
//!
//! One deadline covers submission and the whole event stream. When it
//! passes, the stream ends with `failed{TIMEOUT}` and a cancel is sent to
//! the backend in the background without waiting for it.

use crate::engine::{EngineIdentity, GenerationEngine};
use crate::error::EngineError;
use crate::outcome::{EngineMessage, EngineOutcome, EventStream, FailureCode};
use crate::spec::JobSpec;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kiln_artifact::JobId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Default per-submission deadline
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(180);

/// Engine wrapper enforcing a per-submission deadline
#[derive(Debug, Clone)]
pub struct TimedEngine {
    inner: Arc<dyn GenerationEngine>,
    timeout: Duration,
}

impl TimedEngine {
    /// Wrap `inner` with `timeout`
    #[must_use]
    pub fn new(inner: Arc<dyn GenerationEngine>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Configured deadline
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn abandon(&self, job: JobId) {
        let inner = Arc::clone(&self.inner);
        tracing::warn!(%job, engine = %inner.identity(), timeout_secs = self.timeout.as_secs(), "engine deadline passed, abandoning job");
        tokio::spawn(async move { inner.cancel(job).await });
    }
}

struct Deadline {
    inner: EventStream,
    deadline: Instant,
    engine: TimedEngine,
    job: JobId,
    done: bool,
}

#[async_trait]
impl GenerationEngine for TimedEngine {
    fn identity(&self) -> &EngineIdentity {
        self.inner.identity()
    }

    async fn submit(&self, spec: JobSpec) -> Result<EventStream, EngineError> {
        let deadline = Instant::now() + self.timeout;
        let job = spec.job;

        let inner = match timeout_at(deadline, self.inner.submit(spec)).await {
            Ok(result) => result?,
            Err(_) => {
                self.abandon(job);
                return Err(EngineError::Timeout { after: self.timeout });
            }
        };

        let state = Deadline {
            inner,
            deadline,
            engine: self.clone(),
            job,
            done: false,
        };
        Ok(stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let message = match timeout_at(state.deadline, state.inner.next()).await {
                Ok(Some(message)) => message,
                Ok(None) => EngineMessage::Finished(EngineOutcome::failure(
                    FailureCode::StreamEnded,
                    "engine stream ended without a terminal event",
                )),
                Err(_) => {
                    state.engine.abandon(state.job);
                    EngineMessage::Finished(EngineOutcome::failure(
                        FailureCode::Timeout,
                        format!("engine timed out after {}s", state.engine.timeout.as_secs()),
                    ))
                }
            };
            state.done = message.is_finished();
            Some((message, state))
        })
        .boxed())
    }

    async fn cancel(&self, job: JobId) {
        self.inner.cancel(job).await;
    }
}
