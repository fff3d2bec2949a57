//! Dual-engine execution
//!
//! The primary engine is always run and its stream is returned to the
//! caller. A shadow engine, when configured, runs the same job on its own
//! task once the contract gate has passed. Shadow results only reach the
//! run log and the health counters; its failures are logged and dropped.

use crate::runs::{EngineRunLog, RunMode, RunStatus};
use futures::StreamExt;
use kiln_artifact::ProjectId;
use kiln_engine::{EngineMessage, EngineOutcome, EventStream, FailureCode, GenerationEngine, JobSpec};
use kiln_gate::ContractCheck;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Which projects may run shadow jobs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowPolicy {
    enabled: bool,
    projects: HashSet<ProjectId>,
}

impl ShadowPolicy {
    /// No shadow runs
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Shadow runs for every project
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self {
            enabled: true,
            projects: HashSet::new(),
        }
    }

    /// Shadow runs only for `projects`
    #[must_use]
    pub fn only(projects: impl IntoIterator<Item = ProjectId>) -> Self {
        Self {
            enabled: true,
            projects: projects.into_iter().collect(),
        }
    }

    /// Whether `project` gets a shadow run
    #[inline]
    #[must_use]
    pub fn allows(&self, project: &ProjectId) -> bool {
        self.enabled && (self.projects.is_empty() || self.projects.contains(project))
    }
}

/// Shadow outcome counters
#[derive(Debug, Default)]
pub struct ShadowHealth {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    gated_off: AtomicU64,
}

/// Point-in-time copy of [`ShadowHealth`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShadowHealthSnapshot {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Jobs skipped because the gate did not pass
    pub gated_off: u64,
}

impl ShadowHealth {
    #[must_use]
    pub fn snapshot(&self) -> ShadowHealthSnapshot {
        ShadowHealthSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            gated_off: self.gated_off.load(Ordering::Relaxed),
        }
    }

    fn record(&self, status: RunStatus) {
        let counter = match status {
            RunStatus::Completed => &self.completed,
            RunStatus::Timeout => &self.timed_out,
            RunStatus::Failed | RunStatus::Running => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
struct ShadowLane {
    engine: Arc<dyn GenerationEngine>,
    gate: Arc<dyn ContractCheck>,
    policy: ShadowPolicy,
}

/// A started primary run
pub struct ExecutorRun {
    /// Primary messages, ending with exactly one `Finished`
    pub events: EventStream,
    /// Shadow task, if one was spawned
    pub shadow: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ExecutorRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRun")
            .field("shadow", &self.shadow.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs jobs against a primary and, optionally, a shadow engine
#[derive(Debug)]
pub struct DualEngineExecutor {
    primary: Arc<dyn GenerationEngine>,
    shadow: Option<ShadowLane>,
    runs: Arc<EngineRunLog>,
    health: Arc<ShadowHealth>,
}

impl DualEngineExecutor {
    /// Primary-only executor
    #[must_use]
    pub fn new(primary: Arc<dyn GenerationEngine>) -> Self {
        Self {
            primary,
            shadow: None,
            runs: Arc::new(EngineRunLog::new()),
            health: Arc::new(ShadowHealth::default()),
        }
    }

    /// With a shadow engine behind `gate`
    #[must_use]
    pub fn with_shadow(
        mut self,
        engine: Arc<dyn GenerationEngine>,
        gate: Arc<dyn ContractCheck>,
        policy: ShadowPolicy,
    ) -> Self {
        self.shadow = Some(ShadowLane { engine, gate, policy });
        self
    }

    /// Share an existing run log
    #[must_use]
    pub fn with_run_log(mut self, runs: Arc<EngineRunLog>) -> Self {
        self.runs = runs;
        self
    }

    /// Run records
    #[inline]
    #[must_use]
    pub fn runs(&self) -> &Arc<EngineRunLog> {
        &self.runs
    }

    /// Shadow counters
    #[inline]
    #[must_use]
    pub fn shadow_health(&self) -> ShadowHealthSnapshot {
        self.health.snapshot()
    }

    /// Gate guarding the shadow engine
    #[inline]
    #[must_use]
    pub fn gate(&self) -> Option<&Arc<dyn ContractCheck>> {
        self.shadow.as_ref().map(|lane| &lane.gate)
    }

    /// Start a job
    ///
    /// Never fails: submission errors become a single failed `Finished`.
    pub async fn run(&self, spec: JobSpec) -> ExecutorRun {
        let shadow = self.spawn_shadow(&spec);

        let job = spec.job;
        let run = self.runs.start(job, self.primary.identity().clone(), RunMode::Primary);
        let events = match self.primary.submit(spec).await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(%job, %error, "primary submission failed");
                error.into_stream()
            }
        };

        let runs = Arc::clone(&self.runs);
        let events = events
            .inspect(move |message| {
                if let EngineMessage::Finished(outcome) = message {
                    runs.finish(run, outcome);
                }
            })
            .boxed();
        ExecutorRun { events, shadow }
    }

    fn spawn_shadow(&self, spec: &JobSpec) -> Option<JoinHandle<()>> {
        let lane = self.shadow.as_ref()?;
        if !lane.policy.allows(&spec.project) {
            return None;
        }
        if lane.gate.cached().is_some_and(|v| !v.is_pass()) {
            self.health.gated_off.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let lane = lane.clone();
        let spec = spec.clone();
        let runs = Arc::clone(&self.runs);
        let health = Arc::clone(&self.health);
        Some(tokio::spawn(run_shadow(lane, spec, runs, health)))
    }
}

async fn run_shadow(lane: ShadowLane, spec: JobSpec, runs: Arc<EngineRunLog>, health: Arc<ShadowHealth>) {
    let job = spec.job;
    let verdict = match lane.gate.cached() {
        Some(verdict) => verdict,
        None => lane.gate.verify().await,
    };
    if !verdict.is_pass() {
        health.gated_off.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%job, verdict = %verdict.verdict, "shadow skipped, gate not passed");
        return;
    }

    health.started.fetch_add(1, Ordering::Relaxed);
    let engine = lane.engine.identity().clone();
    let run = runs.start(job, engine.clone(), RunMode::Shadow);

    let mut events = match lane.engine.submit(spec).await {
        Ok(events) => events,
        Err(error) => error.into_stream(),
    };
    let mut outcome = None;
    while let Some(message) = events.next().await {
        if let EngineMessage::Finished(finished) = message {
            outcome = Some(finished);
            break;
        }
    }
    let outcome = outcome.unwrap_or_else(|| {
        EngineOutcome::failure(FailureCode::StreamEnded, "shadow stream ended without a terminal event")
    });

    health.record(RunStatus::of(&outcome));
    runs.finish(run, &outcome);

    match &outcome {
        EngineOutcome::Success { .. } => tracing::info!(%job, %engine, "shadow run completed"),
        EngineOutcome::Failure { code, message, .. } => {
            tracing::warn!(%job, %engine, %code, %message, "shadow run failed");
        }
    }
}
