//! Kiln Stream - backend server-push frames to canonical events
//!
//! # Core Concepts
//!
//! - [`FrameDecoder`]: reassembles records split across network reads
//! - [`EventKind`]: the canonical vocabulary plus tag pass-through
//! - [`StreamBridge`] / [`bridge`]: decode, map and relay in arrival order
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use kiln_stream::bridge;
//!
//! let mut events = Box::pin(bridge(response.bytes_stream()));
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event?)?);
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod bridge;
mod canonical;
mod decoder;

pub use bridge::{bridge, BridgeError, BridgeStats, StreamBridge};
pub use canonical::{CanonicalEvent, EventKind, TAG_TABLE};
pub use decoder::{FrameDecoder, FrameError, RawFrame, DEFAULT_MAX_FRAME_BYTES};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
