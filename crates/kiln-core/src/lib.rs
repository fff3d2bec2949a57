//! Kiln Core - generation job orchestration
//!
//! # Core Concepts
//!
//! - [`JobOrchestrator`]: accepts requests, one active job per project
//! - [`IntentClassifier`]: maps free text to edit, chat or restore
//! - [`Job`]: state machine from `received` to `completed` or `failed`
//! - [`DualEngineExecutor`]: primary engine plus an optional gated shadow
//! - [`KilnConfig`]: TOML configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_core::{JobOrchestrator, KilnConfig, SubmitRequest};
//! use kiln_artifact::{CallerId, ProjectId};
//!
//! let orchestrator = JobOrchestrator::from_config(&KilnConfig::load("kiln.toml")?).await?;
//! let mut job = orchestrator.submit(SubmitRequest::new(
//!     ProjectId::new("breakout"),
//!     CallerId::new("alice"),
//!     "make the paddle wider",
//! ))?;
//! while let Some(event) = job.next_event().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod classifier;
mod config;
mod conversation;
mod error;
mod executor;
mod job;
mod orchestrator;
mod runs;

pub use classifier::{Basis, Classification, IntentClassifier, PatternClassifier};
pub use config::{
    ConversationConfig, EngineConfig, GateConfig, KilnConfig, ShadowConfig, StoreConfig, StoreKind,
};
pub use conversation::ConversationLog;
pub use error::{ConfigError, OrchestratorError};
pub use executor::{
    DualEngineExecutor, ExecutorRun, ShadowHealth, ShadowHealthSnapshot, ShadowPolicy,
};
pub use job::{allowed_transitions, validate_transition, Job, JobResult, JobState};
pub use orchestrator::{JobHandle, JobOrchestrator, OrchestratorBuilder, SubmitRequest};
pub use runs::{EngineRun, EngineRunId, EngineRunLog, RunMode, RunStatus, DEFAULT_RUN_LOG_CAPACITY};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
