//! Job orchestrator
//!
//! Owns the per-project active-job table. `submit` acquires the project,
//! classifies the text and spawns the job; everything after that happens on
//! the job's own task. The caller sees canonical events on an unbounded
//! channel ending in exactly one `completed` or `failed`.
//!
//! The project lock is released before the terminal event is sent, so a
//! caller may submit the next job as soon as it sees the terminal event.
//! Dropping the [`JobHandle`] stops delivery only; the job still runs to
//! completion and commits its version.

use crate::classifier::{Basis, Classification, IntentClassifier, PatternClassifier};
use crate::config::{KilnConfig, StoreKind};
use crate::conversation::ConversationLog;
use crate::error::{ConfigError, OrchestratorError};
use crate::executor::{DualEngineExecutor, ShadowPolicy};
use crate::job::{Job, JobState};
use crate::runs::EngineRunLog;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use kiln_artifact::{
    CallerId, EditSummary, FileSet, FsVersionStore, InMemoryVersionStore, JobId, NewVersion,
    ProjectId, StoreError, VersionId, VersionStore,
};
use kiln_engine::{
    ConversationTurn, EngineMessage, EngineOutcome, FailureCode, HttpEngine, Intent, JobSpec,
    TimedEngine, DEFAULT_CONTEXT_WINDOW,
};
use kiln_gate::{ContractCheck, ContractGate};
use kiln_stream::CanonicalEvent;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub project: ProjectId,
    pub caller: CallerId,
    pub text: String,
    /// Explicit restore target; forces a restore job
    pub restore_to: Option<VersionId>,
}

impl SubmitRequest {
    #[must_use]
    pub fn new(project: ProjectId, caller: CallerId, text: impl Into<String>) -> Self {
        Self {
            project,
            caller,
            text: text.into(),
            restore_to: None,
        }
    }

    /// Restore `version` regardless of the text
    #[inline]
    #[must_use]
    pub fn with_restore_to(mut self, version: VersionId) -> Self {
        self.restore_to = Some(version);
        self
    }
}

/// Caller side of a running job
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    intent: Intent,
    events: mpsc::UnboundedReceiver<CanonicalEvent>,
    task: JoinHandle<Job>,
}

impl JobHandle {
    #[inline]
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[inline]
    #[must_use]
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Next event; `None` after the terminal event
    pub async fn next_event(&mut self) -> Option<CanonicalEvent> {
        self.events.recv().await
    }

    /// Every remaining event, through the terminal one
    pub async fn collect(mut self) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        events
    }

    /// Stop receiving and wait for the finished job
    ///
    /// # Errors
    /// Returns `Internal` if the job task was aborted
    pub async fn join(self) -> Result<Job, OrchestratorError> {
        drop(self.events);
        self.task
            .await
            .map_err(|e| OrchestratorError::Internal(format!("job task ended abnormally: {e}")))
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveJob {
    job: JobId,
    state: JobState,
}

/// Holds a project for one job; released on drop, including unwinding
#[derive(Debug)]
struct ProjectLock {
    active: Arc<DashMap<ProjectId, ActiveJob>>,
    project: ProjectId,
    job: JobId,
}

impl ProjectLock {
    fn acquire(
        active: &Arc<DashMap<ProjectId, ActiveJob>>,
        project: &ProjectId,
        job: JobId,
    ) -> Result<Self, OrchestratorError> {
        match active.entry(project.clone()) {
            Entry::Occupied(entry) => Err(OrchestratorError::ProjectBusy {
                project: project.clone(),
                active: entry.get().job,
            }),
            Entry::Vacant(entry) => {
                entry.insert(ActiveJob {
                    job,
                    state: JobState::Received,
                });
                Ok(Self {
                    active: Arc::clone(active),
                    project: project.clone(),
                    job,
                })
            }
        }
    }

    fn set_state(&self, state: JobState) {
        if let Some(mut entry) = self.active.get_mut(&self.project) {
            if entry.job == self.job {
                entry.state = state;
            }
        }
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let job = self.job;
        self.active.remove_if(&self.project, |_, active| active.job == job);
    }
}

/// Events to the caller; a gone caller is not an error
#[derive(Debug)]
struct EventSink {
    tx: mpsc::UnboundedSender<CanonicalEvent>,
    disconnected: AtomicBool,
    job: JobId,
}

impl EventSink {
    fn send(&self, event: CanonicalEvent) {
        if self.tx.send(event).is_err() && !self.disconnected.swap(true, Ordering::Relaxed) {
            tracing::debug!(job = %self.job, "caller disconnected, job continues");
        }
    }
}

/// Terminal failure of a job
#[derive(Debug)]
struct JobFailure {
    code: FailureCode,
    message: String,
}

impl JobFailure {
    fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<OrchestratorError> for JobFailure {
    fn from(error: OrchestratorError) -> Self {
        Self::new(FailureCode::Internal, error.to_string())
    }
}

impl From<StoreError> for JobFailure {
    fn from(error: StoreError) -> Self {
        Self::new(FailureCode::Internal, format!("version store: {error}"))
    }
}

#[derive(Debug)]
struct Inner {
    classifier: Arc<dyn IntentClassifier>,
    executor: DualEngineExecutor,
    store: Arc<dyn VersionStore>,
    conversation: ConversationLog,
    context_window: usize,
    active: Arc<DashMap<ProjectId, ActiveJob>>,
}

/// Top-level job coordinator
#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`JobOrchestrator`]
#[derive(Debug)]
pub struct OrchestratorBuilder {
    executor: DualEngineExecutor,
    store: Arc<dyn VersionStore>,
    classifier: Arc<dyn IntentClassifier>,
    context_window: usize,
}

impl OrchestratorBuilder {
    /// Replace the pattern classifier
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Prior-context window sent to engines
    #[inline]
    #[must_use]
    pub fn context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    #[must_use]
    pub fn build(self) -> JobOrchestrator {
        JobOrchestrator {
            inner: Arc::new(Inner {
                classifier: self.classifier,
                executor: self.executor,
                store: self.store,
                conversation: ConversationLog::new(self.context_window),
                context_window: self.context_window,
                active: Arc::new(DashMap::new()),
            }),
        }
    }
}

impl JobOrchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder(executor: DualEngineExecutor, store: Arc<dyn VersionStore>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            executor,
            store,
            classifier: Arc::new(PatternClassifier::new()),
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Wire engines, gate and store from configuration
    ///
    /// # Errors
    /// Returns error if an engine, the gate or the store cannot be set up
    pub async fn from_config(config: &KilnConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let primary = HttpEngine::new(&config.engine.name, &config.engine.url)?
            .with_cancel(config.engine.supports_cancel);
        let mut executor = DualEngineExecutor::new(Arc::new(TimedEngine::new(
            Arc::new(primary),
            config.engine.timeout(),
        )))
        .with_run_log(Arc::new(EngineRunLog::with_capacity(config.shadow.run_log_capacity)));

        if let (true, Some(url)) = (config.shadow.enabled, &config.shadow.url) {
            let candidate = HttpEngine::new(&config.shadow.name, url)?;
            let candidate = TimedEngine::new(
                Arc::new(candidate),
                std::time::Duration::from_secs(config.shadow.timeout_secs),
            );
            let mut gate = ContractGate::new(url.clone())?.with_probe_timeout(config.gate.probe_timeout());
            if !config.gate.probes.is_empty() {
                gate = gate.with_battery(config.gate.probes.clone())?;
            }
            let policy = if config.shadow.projects.is_empty() {
                ShadowPolicy::all()
            } else {
                ShadowPolicy::only(config.shadow.projects.iter().cloned())
            };
            executor = executor.with_shadow(Arc::new(candidate), Arc::new(gate), policy);
        }

        let store: Arc<dyn VersionStore> = match (config.store.kind, &config.store.path) {
            (StoreKind::Memory, _) => Arc::new(InMemoryVersionStore::new()),
            (StoreKind::Fs, Some(path)) => Arc::new(FsVersionStore::open(path).await?),
            (StoreKind::Fs, None) => {
                return Err(ConfigError::Invalid("store.kind = \"fs\" requires store.path".into()).into())
            }
        };

        Ok(Self::builder(executor, store)
            .context_window(config.conversation.window)
            .build())
    }

    /// Version store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.inner.store
    }

    /// Engine executor
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &DualEngineExecutor {
        &self.inner.executor
    }

    /// Gate guarding the shadow engine, if any
    #[inline]
    #[must_use]
    pub fn gate(&self) -> Option<&Arc<dyn ContractCheck>> {
        self.inner.executor.gate()
    }

    /// Job currently holding `project`, with its state
    #[must_use]
    pub fn active_job(&self, project: &ProjectId) -> Option<(JobId, JobState)> {
        self.inner.active.get(project).map(|a| (a.job, a.state))
    }

    /// Classify without submitting
    #[must_use]
    pub fn classify(&self, text: &str) -> Classification {
        self.inner.classifier.explain(text)
    }

    /// Accept a request and start its job
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `ProjectBusy` if the project already has an unfinished job;
    /// nothing is started in that case.
    pub fn submit(&self, request: SubmitRequest) -> Result<JobHandle, OrchestratorError> {
        let mut job = Job::new(request.project, request.caller, request.text);
        let lock = ProjectLock::acquire(&self.inner.active, job.project(), job.id())?;

        let classification = match request.restore_to {
            Some(_) => Classification {
                intent: Intent::Restore,
                basis: Basis::Restore,
            },
            None => self.inner.classifier.explain(job.text()),
        };
        job.classify(classification.intent)?;
        lock.set_state(JobState::Classified);
        tracing::info!(
            job = %job.id(),
            project = %job.project(),
            intent = %classification.intent,
            basis = ?classification.basis,
            "job accepted"
        );

        let (tx, events) = mpsc::unbounded_channel();
        let job_id = job.id();
        let run = JobRun {
            inner: Arc::clone(&self.inner),
            sink: EventSink {
                tx,
                disconnected: AtomicBool::new(false),
                job: job_id,
            },
            job,
            lock: Some(lock),
            restore_to: request.restore_to,
        };
        let task = tokio::spawn(run.execute());

        Ok(JobHandle {
            job_id,
            intent: classification.intent,
            events,
            task,
        })
    }
}

/// One job on its own task
struct JobRun {
    inner: Arc<Inner>,
    job: Job,
    lock: Option<ProjectLock>,
    sink: EventSink,
    restore_to: Option<VersionId>,
}

impl JobRun {
    async fn execute(mut self) -> Job {
        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;
        let terminal = match outcome {
            Ok(Ok(completed)) => completed,
            Ok(Err(failure)) => self.fail(failure),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(job = %self.job.id(), %reason, "job panicked");
                self.fail(JobFailure::new(FailureCode::Internal, format!("internal error: {reason}")))
            }
        };

        drop(self.lock.take());
        self.sink.send(terminal);
        tracing::info!(job = %self.job.id(), project = %self.job.project(), state = %self.job.state(), "job finished");
        self.job
    }

    fn fail(&mut self, failure: JobFailure) -> CanonicalEvent {
        if !self.job.state().is_terminal() {
            if let Err(error) = self.job.fail(failure.code, failure.message.clone()) {
                tracing::error!(job = %self.job.id(), %error, "could not record failure");
            }
        }
        tracing::warn!(job = %self.job.id(), code = %failure.code, message = %failure.message, "job failed");
        CanonicalEvent::failed(failure.code.as_str(), failure.message)
    }

    fn advance(&mut self, to: JobState) -> Result<(), JobFailure> {
        self.job.advance(to)?;
        self.set_lock_state(to);
        Ok(())
    }

    fn set_lock_state(&self, state: JobState) {
        if let Some(lock) = &self.lock {
            lock.set_state(state);
        }
    }

    async fn drive(&mut self) -> Result<CanonicalEvent, JobFailure> {
        match self.job.intent() {
            Some(Intent::Restore) => self.restore().await,
            Some(intent) => self.generate(intent).await,
            None => Err(JobFailure::new(FailureCode::Internal, "job was not classified")),
        }
    }

    async fn restore(&mut self) -> Result<CanonicalEvent, JobFailure> {
        self.advance(JobState::Finalizing)?;
        let store = Arc::clone(&self.inner.store);
        let project = self.job.project().clone();

        let target = match self.restore_to {
            Some(target) => target,
            None => {
                let missing = || JobFailure::new(FailureCode::RestoreTargetMissing, "no earlier version to restore");
                let head = store.head(&project).await?.ok_or_else(missing)?;
                let head = store.get(head).await?.ok_or_else(missing)?;
                head.parent().ok_or_else(missing)?
            }
        };
        self.sink
            .send(CanonicalEvent::progress(format!("restoring version {}", target.short())));

        let version = match store.restore(&project, target, self.job.id()).await {
            Ok(version) => version,
            Err(error @ (StoreError::VersionNotFound(_) | StoreError::WrongProject { .. })) => {
                return Err(JobFailure::new(FailureCode::RestoreTargetMissing, error.to_string()));
            }
            Err(error) => return Err(commit_failed(&error)),
        };
        let refs = match store.get(version).await? {
            Some(v) => v.files().paths().map(str::to_string).collect(),
            None => Vec::new(),
        };
        let summary = store.diff(version).await.ok();
        self.complete(Some(version), refs, summary, None)
    }

    async fn generate(&mut self, intent: Intent) -> Result<CanonicalEvent, JobFailure> {
        self.advance(JobState::Dispatched)?;
        let store = Arc::clone(&self.inner.store);
        let project = self.job.project().clone();

        let head = store.head(&project).await?;
        let files = match head {
            Some(id) => store.get(id).await?.map(|v| v.files().clone()).unwrap_or_default(),
            None => FileSet::new(),
        };
        let spec = JobSpec::new(
            self.job.id(),
            self.job.caller().clone(),
            project.clone(),
            intent,
            self.job.text(),
        )
        .with_context(self.inner.conversation.recent(&project), self.inner.context_window)
        .with_files(files);
        self.inner
            .conversation
            .record(&project, ConversationTurn::user(self.job.text()));

        let mut events = self.inner.executor.run(spec).await.events;
        self.advance(JobState::Streaming)?;
        let outcome = loop {
            match events.next().await {
                Some(EngineMessage::Event(event)) => self.sink.send(event),
                Some(EngineMessage::Finished(outcome)) => break outcome,
                None => {
                    break EngineOutcome::failure(
                        FailureCode::StreamEnded,
                        "engine stream ended without a terminal event",
                    )
                }
            }
        };
        self.advance(JobState::Finalizing)?;

        let (files, summary) = match outcome {
            EngineOutcome::Failure { code, message, .. } => return Err(JobFailure::new(code, message)),
            EngineOutcome::Success { files, summary, .. } => (files, summary),
        };
        if let Some(summary) = &summary {
            self.inner
                .conversation
                .record(&project, ConversationTurn::assistant(summary.clone()));
        }
        if intent == Intent::Chat {
            return self.complete(None, Vec::new(), None, summary);
        }

        let files = files
            .filter(|f| !f.is_empty())
            .ok_or_else(|| JobFailure::new(FailureCode::EmptyResult, "engine returned no artifact files"))?;
        let refs: Vec<String> = files.paths().map(str::to_string).collect();
        let mut new = NewVersion::new(project, head, files, self.job.id());
        if let Some(summary) = &summary {
            new = new.with_description(summary.clone());
        }
        let version = store.commit(new).await.map_err(|e| commit_failed(&e))?;
        let edit = store.diff(version).await.ok();
        self.complete(Some(version), refs, edit, summary)
    }

    fn complete(
        &mut self,
        version: Option<VersionId>,
        artifact_refs: Vec<String>,
        summary: Option<EditSummary>,
        message: Option<String>,
    ) -> Result<CanonicalEvent, JobFailure> {
        self.job.complete(version)?;
        self.set_lock_state(JobState::Completed);
        Ok(CanonicalEvent::completed(json!({
            "jobId": self.job.id(),
            "intent": self.job.intent(),
            "versionId": version,
            "artifactRefs": artifact_refs,
            "summary": summary,
            "message": message,
        })))
    }
}

fn commit_failed(error: &StoreError) -> JobFailure {
    tracing::error!(%error, "version commit failed after successful generation");
    JobFailure::new(
        FailureCode::VersionCommitFailed,
        format!("generated content could not be saved: {error}"),
    )
}
