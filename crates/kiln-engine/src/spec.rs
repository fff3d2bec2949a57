//! Job specification handed to an engine

use chrono::{DateTime, Utc};
use kiln_artifact::{CallerId, FileSet, JobId, ProjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prior conversation turns sent with each job by default
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// What the caller is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Change the artifact
    Edit,
    /// Ask about the artifact without changing it
    Chat,
    /// Bring back an earlier version
    Restore,
}

impl Intent {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Chat => "chat",
            Self::Restore => "restore",
        }
    }

    /// Whether jobs of this intent go through an engine
    #[inline]
    #[must_use]
    pub const fn needs_engine(self) -> bool {
        !matches!(self, Self::Restore)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(Self::Edit),
            "chat" => Ok(Self::Chat),
            "restore" => Ok(Self::Restore),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of prior conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Turn spoken by the user, stamped now
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    /// Turn spoken by the engine, stamped now
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Everything an engine needs to run one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub job: JobId,
    pub caller: CallerId,
    pub project: ProjectId,
    pub intent: Intent,
    pub text: String,
    /// Most recent turns only, oldest first
    #[serde(default)]
    pub context: Vec<ConversationTurn>,
    /// Current artifact contents (empty for a new project)
    #[serde(default)]
    pub files: FileSet,
}

impl JobSpec {
    /// Create a spec with no context and no files
    #[must_use]
    pub fn new(
        job: JobId,
        caller: CallerId,
        project: ProjectId,
        intent: Intent,
        text: impl Into<String>,
    ) -> Self {
        Self {
            job,
            caller,
            project,
            intent,
            text: text.into(),
            context: Vec::new(),
            files: FileSet::new(),
        }
    }

    /// With prior conversation, keeping only the last `window` turns
    #[must_use]
    pub fn with_context(mut self, turns: impl IntoIterator<Item = ConversationTurn>, window: usize) -> Self {
        let mut turns: Vec<_> = turns.into_iter().collect();
        let skip = turns.len().saturating_sub(window);
        self.context = turns.split_off(skip);
        self
    }

    /// With current artifact files
    #[inline]
    #[must_use]
    pub fn with_files(mut self, files: FileSet) -> Self {
        self.files = files;
        self
    }
}
