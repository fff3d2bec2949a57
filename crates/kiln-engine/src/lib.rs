//! Kiln Engine - uniform adapter over generation backends
//!
//! # Core Concepts
//!
//! - [`JobSpec`]: caller, project, intent, bounded context and current files
//! - [`GenerationEngine`]: submit a job, receive canonical events then one outcome
//! - [`HttpEngine`]: backend reached over HTTP with a server-push response
//! - [`TimedEngine`]: one hard deadline across submission and streaming
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_engine::{GenerationEngine, HttpEngine, TimedEngine};
//!
//! let engine = TimedEngine::new(Arc::new(HttpEngine::new("primary", url)?), timeout);
//! let mut events = engine.submit(spec).await?;
//! while let Some(message) = events.next().await { /* relay */ }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod deadline;
mod engine;
mod error;
mod http;
mod outcome;
mod spec;

pub use deadline::{TimedEngine, DEFAULT_ENGINE_TIMEOUT};
pub use engine::{EngineIdentity, GenerationEngine};
pub use error::EngineError;
pub use http::{HttpEngine, DEFAULT_CONNECT_TIMEOUT};
pub use outcome::{fold_events, EngineMessage, EngineOutcome, EventStream, FailureCode, OutcomeFolder};
pub use spec::{ConversationTurn, Intent, JobSpec, Role, DEFAULT_CONTEXT_WINDOW};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
