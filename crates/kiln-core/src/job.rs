//! Jobs and the job state machine
//!
//! ```text
//! Received -> Classified -> Dispatched -> Streaming -> Finalizing -> Completed
//!                  |                                       ^
//!                  +------------- restore -----------------+
//! ```
//!
//! Every non-terminal state may also move to `Failed`.

use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use kiln_artifact::{CallerId, JobId, ProjectId, VersionId};
use kiln_engine::{FailureCode, Intent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Received,
    Classified,
    Dispatched,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl JobState {
    /// Every state
    pub const ALL: [Self; 7] = [
        Self::Received,
        Self::Classified,
        Self::Dispatched,
        Self::Streaming,
        Self::Finalizing,
        Self::Completed,
        Self::Failed,
    ];

    /// `Completed` or `Failed`
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Classified => "classified",
            Self::Dispatched => "dispatched",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: JobState) -> Vec<JobState> {
    use JobState::*;
    match from {
        Received => vec![Classified, Failed],
        Classified => vec![Dispatched, Finalizing, Failed],
        Dispatched => vec![Streaming, Failed],
        Streaming => vec![Finalizing, Failed],
        Finalizing => vec![Completed, Failed],
        Completed | Failed => vec![],
    }
}

/// Check a single transition
///
/// # Errors
/// Returns `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: JobState, to: JobState) -> Result<(), OrchestratorError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OrchestratorError::IllegalTransition { from, to })
    }
}

/// Final result of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobResult {
    /// Committed `version`, or nothing for chat jobs
    Success { version: Option<VersionId> },
    Failure { code: FailureCode, message: String },
}

/// One user-triggered request
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    id: JobId,
    project: ProjectId,
    caller: CallerId,
    intent: Option<Intent>,
    text: String,
    created_at: DateTime<Utc>,
    state: JobState,
    result: Option<JobResult>,
}

impl Job {
    /// New job in `Received`
    #[must_use]
    pub fn new(project: ProjectId, caller: CallerId, text: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            project,
            caller,
            intent: None,
            text: text.into(),
            created_at: Utc::now(),
            state: JobState::Received,
            result: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    #[inline]
    #[must_use]
    pub fn caller(&self) -> &CallerId {
        &self.caller
    }

    /// Intent, once classified
    #[inline]
    #[must_use]
    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Terminal result, once finished
    #[inline]
    #[must_use]
    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    /// `Received -> Classified`
    ///
    /// # Errors
    /// Returns `IllegalTransition` unless the job is in `Received`
    pub fn classify(&mut self, intent: Intent) -> Result<(), OrchestratorError> {
        self.advance(JobState::Classified)?;
        self.intent = Some(intent);
        Ok(())
    }

    /// Move to a non-terminal state
    ///
    /// # Errors
    /// Returns `IllegalTransition` if the move is not allowed
    pub fn advance(&mut self, to: JobState) -> Result<(), OrchestratorError> {
        validate_transition(self.state, to)?;
        tracing::debug!(job = %self.id, from = %self.state, %to, "job transition");
        self.state = to;
        Ok(())
    }

    /// `Finalizing -> Completed`
    ///
    /// # Errors
    /// Returns `IllegalTransition` unless the job is in `Finalizing`
    pub fn complete(&mut self, version: Option<VersionId>) -> Result<(), OrchestratorError> {
        self.advance(JobState::Completed)?;
        self.result = Some(JobResult::Success { version });
        Ok(())
    }

    /// Any non-terminal state `-> Failed`
    ///
    /// # Errors
    /// Returns `IllegalTransition` if the job already finished
    pub fn fail(&mut self, code: FailureCode, message: impl Into<String>) -> Result<(), OrchestratorError> {
        self.advance(JobState::Failed)?;
        self.result = Some(JobResult::Failure {
            code,
            message: message.into(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job() -> Job {
        Job::new(ProjectId::new("p"), CallerId::new("c"), "add a timer")
    }

    #[test]
    fn edit_path() {
        let mut job = job();
        job.classify(Intent::Edit).unwrap();
        job.advance(JobState::Dispatched).unwrap();
        job.advance(JobState::Streaming).unwrap();
        job.advance(JobState::Finalizing).unwrap();
        job.complete(None).unwrap();
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.result(), Some(&JobResult::Success { version: None }));
    }

    #[test]
    fn restore_skips_engine_states() {
        let mut job = job();
        job.classify(Intent::Restore).unwrap();
        assert!(job.advance(JobState::Finalizing).is_ok());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        job.fail(FailureCode::Internal, "boom").unwrap();
        assert!(job.fail(FailureCode::Internal, "again").is_err());
        assert!(job.advance(JobState::Classified).is_err());
        assert!(matches!(job.result(), Some(JobResult::Failure { code: FailureCode::Internal, .. })));
    }

    #[test]
    fn cannot_skip_streaming() {
        assert!(validate_transition(JobState::Dispatched, JobState::Finalizing).is_err());
        assert!(validate_transition(JobState::Received, JobState::Dispatched).is_err());
    }

    fn any_state() -> impl Strategy<Value = JobState> {
        proptest::sample::select(JobState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn validation_matches_table(from in any_state(), to in any_state()) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }

        #[test]
        fn every_live_state_can_fail(from in any_state()) {
            prop_assert_eq!(
                validate_transition(from, JobState::Failed).is_ok(),
                !from.is_terminal()
            );
        }
    }
}
