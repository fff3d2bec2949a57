//! Testing utilities for Kiln workspace
//!
//! Scripted engines, a fixed contract gate, a store that refuses commits,
//! and small fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kiln_artifact::{
    FileSet, InMemoryVersionStore, JobId, NewVersion, ProjectId, StoreError, Version, VersionId,
    VersionStore,
};
use kiln_engine::{
    EngineError, EngineIdentity, EngineMessage, EngineOutcome, EventStream, FailureCode,
    GenerationEngine, JobSpec,
};
use kiln_gate::{ContractCheck, ContractVerdict, ProbeFailure};
use kiln_stream::CanonicalEvent;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One step of a scripted engine response
#[derive(Debug, Clone)]
pub enum Step {
    Emit(EngineMessage),
    Delay(Duration),
    /// Wait for a notification before continuing
    Wait(Arc<Notify>),
    /// Never continue
    Stall,
}

/// Engine replaying a fixed script for every submission
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    identity: EngineIdentity,
    script: Vec<Step>,
    reject: Option<u16>,
    panic_on_submit: bool,
    submissions: Arc<Mutex<Vec<JobSpec>>>,
    cancels: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    /// Engine with an empty script
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            identity: EngineIdentity::new(name),
            script: Vec::new(),
            reject: None,
            panic_on_submit: false,
            submissions: Arc::new(Mutex::new(Vec::new())),
            cancels: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.script.push(step);
        self
    }

    #[must_use]
    pub fn event(self, event: CanonicalEvent) -> Self {
        self.step(Step::Emit(EngineMessage::Event(event)))
    }

    #[must_use]
    pub fn progress(self, message: &str) -> Self {
        self.event(CanonicalEvent::progress(message))
    }

    #[must_use]
    pub fn chunk(self, content: &str) -> Self {
        self.event(CanonicalEvent::stream(content))
    }

    #[must_use]
    pub fn delay(self, duration: Duration) -> Self {
        self.step(Step::Delay(duration))
    }

    #[must_use]
    pub fn wait_for(self, release: Arc<Notify>) -> Self {
        self.step(Step::Wait(release))
    }

    #[must_use]
    pub fn stall(self) -> Self {
        self.step(Step::Stall)
    }

    /// Finish successfully with files
    #[must_use]
    pub fn succeed_with(self, files: FileSet, summary: &str) -> Self {
        self.step(Step::Emit(EngineMessage::Finished(EngineOutcome::Success {
            files: Some(files),
            summary: Some(summary.to_string()),
            raw: Value::Null,
        })))
    }

    /// Finish successfully with an answer and no files
    #[must_use]
    pub fn answer(self, text: &str) -> Self {
        self.step(Step::Emit(EngineMessage::Finished(EngineOutcome::Success {
            files: None,
            summary: Some(text.to_string()),
            raw: Value::Null,
        })))
    }

    /// Finish with a failure
    #[must_use]
    pub fn fail(self, code: FailureCode, message: &str) -> Self {
        self.step(Step::Emit(EngineMessage::Finished(EngineOutcome::failure(code, message))))
    }

    /// Refuse every submission with `status`
    #[must_use]
    pub fn reject_with(mut self, status: u16) -> Self {
        self.reject = Some(status);
        self
    }

    /// Panic inside `submit`
    #[must_use]
    pub fn panicking(mut self) -> Self {
        self.panic_on_submit = true;
        self
    }

    /// Specs received so far
    #[must_use]
    pub fn submissions(&self) -> Vec<JobSpec> {
        self.submissions.lock().clone()
    }

    /// Cancel calls received so far
    #[must_use]
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    async fn submit(&self, spec: JobSpec) -> Result<EventStream, EngineError> {
        assert!(!self.panic_on_submit, "scripted engine panic");
        self.submissions.lock().push(spec);
        if let Some(status) = self.reject {
            return Err(EngineError::Rejected {
                status,
                body: "scripted rejection".to_string(),
            });
        }
        let steps = self.script.clone().into_iter();
        Ok(stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.next()? {
                    Step::Emit(message) => return Some((message, steps)),
                    Step::Delay(duration) => tokio::time::sleep(duration).await,
                    Step::Wait(release) => release.notified().await,
                    Step::Stall => futures::future::pending::<()>().await,
                }
            }
        })
        .boxed())
    }

    async fn cancel(&self, _job: JobId) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Gate that reports a preset verdict
#[derive(Debug)]
pub struct FixedGate {
    outcome: ContractVerdict,
    cached: Mutex<Option<ContractVerdict>>,
    verifications: AtomicUsize,
}

impl FixedGate {
    /// Gate whose probes all pass
    #[must_use]
    pub fn passing() -> Self {
        Self::with_outcome(ContractVerdict::from_failures(Vec::new()))
    }

    /// Gate failing `endpoint`
    #[must_use]
    pub fn failing(endpoint: &str, reason: &str) -> Self {
        Self::with_outcome(ContractVerdict::from_failures(vec![ProbeFailure {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }]))
    }

    fn with_outcome(outcome: ContractVerdict) -> Self {
        Self {
            outcome,
            cached: Mutex::new(None),
            verifications: AtomicUsize::new(0),
        }
    }

    /// Number of probe runs
    #[must_use]
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractCheck for FixedGate {
    async fn verify(&self) -> ContractVerdict {
        let mut cached = self.cached.lock();
        if let Some(verdict) = cached.as_ref() {
            return verdict.clone();
        }
        self.verifications.fetch_add(1, Ordering::SeqCst);
        *cached = Some(self.outcome.clone());
        self.outcome.clone()
    }

    fn cached(&self) -> Option<ContractVerdict> {
        self.cached.lock().clone()
    }

    fn reset(&self) {
        *self.cached.lock() = None;
    }
}

/// Store whose commits fail with an I/O error while `failing` is set
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryVersionStore,
    failing: AtomicBool,
}

impl FlakyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VersionStore for FlakyStore {
    async fn commit(&self, new: NewVersion) -> Result<VersionId, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.commit(new).await
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<Version>, StoreError> {
        self.inner.list(project).await
    }

    async fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError> {
        self.inner.get(id).await
    }

    async fn head(&self, project: &ProjectId) -> Result<Option<VersionId>, StoreError> {
        self.inner.head(project).await
    }
}

/// Build a file set from pairs
///
/// # Panics
/// Panics on an invalid path
#[must_use]
pub fn files(pairs: &[(&str, &str)]) -> FileSet {
    pairs
        .iter()
        .fold(FileSet::new(), |set, (path, content)| set.with_file(*path, *content).unwrap())
}

/// A typical edit response: progress, two chunks, success with `files`
#[must_use]
pub fn edit_engine(name: &str, files: FileSet) -> ScriptedEngine {
    ScriptedEngine::new(name)
        .progress("planning")
        .chunk("<canvas")
        .chunk("></canvas>")
        .succeed_with(files, "updated the game")
}
