//! Engine messages and terminal outcomes
//!
//! Engines speak the canonical vocabulary. The adapter folds that stream so
//! the caller sees every non-terminal event as [`EngineMessage::Event`] and
//! then exactly one [`EngineMessage::Finished`]. Artifact payloads
//! (`result` events) are absorbed into the outcome rather than relayed.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use kiln_artifact::FileSet;
use kiln_stream::{BridgeError, CanonicalEvent, EventKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stream of messages produced by one submission
pub type EventStream = BoxStream<'static, EngineMessage>;

/// Code carried by a `failed` terminal event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Engine exceeded its deadline
    Timeout,
    /// Engine refused or reported an error
    EngineRejected,
    /// Stream ended without a terminal event
    StreamEnded,
    /// Edit finished with no artifact files
    EmptyResult,
    /// Generation succeeded but the version could not be stored
    VersionCommitFailed,
    /// Restore named no usable version
    RestoreTargetMissing,
    /// Unexpected orchestrator error
    Internal,
}

impl FailureCode {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::EngineRejected => "ENGINE_REJECTED",
            Self::StreamEnded => "STREAM_ENDED",
            Self::EmptyResult => "EMPTY_RESULT",
            Self::VersionCommitFailed => "VERSION_COMMIT_FAILED",
            Self::RestoreTargetMissing => "RESTORE_TARGET_MISSING",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Timeout,
            Self::EngineRejected,
            Self::StreamEnded,
            Self::EmptyResult,
            Self::VersionCommitFailed,
            Self::RestoreTargetMissing,
            Self::Internal,
        ]
        .into_iter()
        .find(|code| code.as_str() == s)
        .ok_or(())
    }
}

/// Terminal result of one engine submission
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    /// Engine completed
    Success {
        /// Artifact files, if the engine produced any
        files: Option<FileSet>,
        /// Engine's description of the change or its chat answer
        summary: Option<String>,
        /// Terminal payload as received
        raw: Value,
    },
    /// Engine failed, timed out or broke off
    Failure {
        code: FailureCode,
        message: String,
        raw: Value,
    },
}

impl EngineOutcome {
    /// Failure with no payload
    #[must_use]
    pub fn failure(code: FailureCode, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
            raw: Value::Null,
        }
    }

    /// True for [`EngineOutcome::Success`]
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure code, if failed
    #[inline]
    #[must_use]
    pub fn code(&self) -> Option<FailureCode> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { code, .. } => Some(*code),
        }
    }

    /// Terminal payload
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &Value {
        match self {
            Self::Success { raw, .. } | Self::Failure { raw, .. } => raw,
        }
    }
}

/// One item of an engine's output
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Non-terminal canonical event, to be relayed
    Event(CanonicalEvent),
    /// Terminal outcome; nothing follows
    Finished(EngineOutcome),
}

impl EngineMessage {
    /// True for [`EngineMessage::Finished`]
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Folds canonical events into engine messages
#[derive(Debug, Default)]
pub struct OutcomeFolder {
    files: Option<FileSet>,
    summary: Option<String>,
    finished: bool,
}

impl OutcomeFolder {
    /// Fresh folder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal message has been produced
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Take one event; returns the message to emit, if any
    ///
    /// Returns `None` for absorbed `result` events and for anything arriving
    /// after the terminal message.
    pub fn accept(&mut self, event: CanonicalEvent) -> Option<EngineMessage> {
        if self.finished {
            tracing::debug!(kind = %event.kind, "ignoring event after terminal");
            return None;
        }
        match event.kind {
            EventKind::Result => match self.absorb(&event.data) {
                Ok(()) => None,
                Err(message) => Some(self.finish(EngineOutcome::Failure {
                    code: FailureCode::EngineRejected,
                    message,
                    raw: event.data,
                })),
            },
            EventKind::Completed => {
                if let Err(message) = self.absorb(&event.data) {
                    return Some(self.finish(EngineOutcome::Failure {
                        code: FailureCode::EngineRejected,
                        message,
                        raw: event.data,
                    }));
                }
                let outcome = EngineOutcome::Success {
                    files: self.files.take(),
                    summary: self.summary.take(),
                    raw: event.data,
                };
                Some(self.finish(outcome))
            }
            EventKind::Failed => {
                let code = event
                    .str_field("code")
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(FailureCode::EngineRejected);
                let message = event
                    .str_field("message")
                    .or_else(|| event.str_field("error"))
                    .unwrap_or("engine reported a failure")
                    .to_string();
                Some(self.finish(EngineOutcome::Failure {
                    code,
                    message,
                    raw: event.data,
                }))
            }
            _ => Some(EngineMessage::Event(event)),
        }
    }

    /// Input ended; returns the terminal message if none was produced yet
    pub fn end(&mut self) -> Option<EngineMessage> {
        (!self.finished).then(|| {
            self.finish(EngineOutcome::failure(
                FailureCode::StreamEnded,
                "engine stream ended without a terminal event",
            ))
        })
    }

    fn finish(&mut self, outcome: EngineOutcome) -> EngineMessage {
        self.finished = true;
        EngineMessage::Finished(outcome)
    }

    /// Merge `files` and `summary` from a payload; later files win per path
    fn absorb(&mut self, data: &Value) -> Result<(), String> {
        if let Some(files) = data.get("files").filter(|f| !f.is_null()) {
            let map: BTreeMap<String, String> = serde_json::from_value(files.clone())
                .map_err(|e| format!("malformed artifact files: {e}"))?;
            let set = self.files.get_or_insert_with(FileSet::new);
            for (path, content) in map {
                set.insert(path, content).map_err(|e| e.to_string())?;
            }
        }
        if let Some(summary) = data
            .get("summary")
            .or_else(|| data.get("description"))
            .and_then(Value::as_str)
        {
            self.summary = Some(summary.to_string());
        }
        Ok(())
    }
}

/// Fold a bridged canonical stream into an [`EventStream`]
///
/// The result always ends with exactly one `Finished`. A transport error
/// finishes with `STREAM_ENDED`.
pub fn fold_events<S>(events: S) -> EventStream
where
    S: Stream<Item = Result<CanonicalEvent, BridgeError>> + Send + 'static,
{
    let state = Some((Box::pin(events), OutcomeFolder::new()));
    stream::unfold(state, |state| async move {
        let (mut events, mut folder) = state?;
        loop {
            let message = match events.next().await {
                Some(Ok(event)) => folder.accept(event),
                Some(Err(error)) => {
                    folder.finished = true;
                    Some(EngineMessage::Finished(EngineOutcome::failure(
                        FailureCode::StreamEnded,
                        error.to_string(),
                    )))
                }
                None => folder.end(),
            };
            match message {
                Some(message) if message.is_finished() => return Some((message, None)),
                Some(message) => return Some((message, Some((events, folder)))),
                None if folder.is_finished() => return None,
                None => {}
            }
        }
    })
    .boxed()
}
