//! Engine run records
//!
//! Every submission to an engine, primary or shadow, is recorded from start
//! to finish so shadow outcomes can be compared with primary ones later.
//! The log holds at most `capacity` runs; starting a run past that evicts the
//! oldest finished runs. Running entries are never evicted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kiln_artifact::JobId;
use kiln_engine::{EngineIdentity, EngineOutcome, FailureCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use ulid::Ulid;

/// Unique engine run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineRunId(pub Ulid);

impl EngineRunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EngineRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a run is caller-visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Primary,
    Shadow,
}

/// Run progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    /// Terminal status for an outcome
    #[must_use]
    pub fn of(outcome: &EngineOutcome) -> Self {
        match outcome.code() {
            None => Self::Completed,
            Some(FailureCode::Timeout) => Self::Timeout,
            Some(_) => Self::Failed,
        }
    }
}

/// One execution of a job against one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRun {
    pub id: EngineRunId,
    pub job: JobId,
    pub engine: EngineIdentity,
    pub mode: RunMode,
    pub status: RunStatus,
    pub error_code: Option<FailureCode>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Terminal payload as received
    pub raw: Option<Value>,
}

impl EngineRun {
    /// Run starting now
    #[must_use]
    pub fn start(job: JobId, engine: EngineIdentity, mode: RunMode) -> Self {
        Self {
            id: EngineRunId::new(),
            job,
            engine,
            mode,
            status: RunStatus::Running,
            error_code: None,
            started_at: Utc::now(),
            ended_at: None,
            raw: None,
        }
    }

    /// Record the terminal outcome
    pub fn finish(&mut self, outcome: &EngineOutcome) {
        self.status = RunStatus::of(outcome);
        self.error_code = outcome.code();
        self.ended_at = Some(Utc::now());
        self.raw = Some(outcome.raw().clone());
    }

    /// Wall time, once finished
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Default number of runs retained
pub const DEFAULT_RUN_LOG_CAPACITY: usize = 1024;

/// Concurrent, bounded log of engine runs
#[derive(Debug)]
pub struct EngineRunLog {
    runs: DashMap<EngineRunId, EngineRun>,
    capacity: usize,
}

impl Default for EngineRunLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RUN_LOG_CAPACITY)
    }
}

impl EngineRunLog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log retaining at most `capacity` runs (minimum 1)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            runs: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a started run
    pub fn start(&self, job: JobId, engine: EngineIdentity, mode: RunMode) -> EngineRunId {
        let run = EngineRun::start(job, engine, mode);
        let id = run.id;
        self.runs.insert(id, run);
        self.evict();
        id
    }

    /// Drop the oldest finished runs until the log fits its capacity
    fn evict(&self) {
        let excess = self.runs.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut finished: Vec<EngineRunId> = self
            .runs
            .iter()
            .filter(|r| r.status != RunStatus::Running)
            .map(|r| r.id)
            .collect();
        finished.sort_unstable();
        for id in finished.into_iter().take(excess) {
            self.runs.remove(&id);
        }
        tracing::trace!(excess, len = self.runs.len(), "evicted finished engine runs");
    }

    /// Remove and return a job's finished runs, primary first
    pub fn take_for_job(&self, job: JobId) -> Vec<EngineRun> {
        let ids: Vec<EngineRunId> = self
            .runs
            .iter()
            .filter(|r| r.job == job && r.status != RunStatus::Running)
            .map(|r| r.id)
            .collect();
        let mut runs: Vec<EngineRun> = ids
            .into_iter()
            .filter_map(|id| self.runs.remove(&id).map(|(_, run)| run))
            .collect();
        runs.sort_by_key(|r| (r.mode == RunMode::Shadow, r.started_at));
        runs
    }

    /// Record the outcome of a run
    pub fn finish(&self, id: EngineRunId, outcome: &EngineOutcome) {
        if let Some(mut run) = self.runs.get_mut(&id) {
            run.finish(outcome);
        }
    }

    /// Look up a run
    #[must_use]
    pub fn get(&self, id: EngineRunId) -> Option<EngineRun> {
        self.runs.get(&id).map(|r| r.clone())
    }

    /// All runs of a job, primary first
    #[must_use]
    pub fn for_job(&self, job: JobId) -> Vec<EngineRun> {
        let mut runs: Vec<_> = self
            .runs
            .iter()
            .filter(|r| r.job == job)
            .map(|r| r.clone())
            .collect();
        runs.sort_by_key(|r| (r.mode == RunMode::Shadow, r.started_at));
        runs
    }

    /// All runs in one mode, oldest first
    #[must_use]
    pub fn by_mode(&self, mode: RunMode) -> Vec<EngineRun> {
        let mut runs: Vec<_> = self
            .runs
            .iter()
            .filter(|r| r.mode == mode)
            .map(|r| r.clone())
            .collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
