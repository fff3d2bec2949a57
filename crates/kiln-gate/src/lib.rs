//! Kiln Gate - pre-flight contract check for candidate engines
//!
//! A candidate engine may run in shadow mode only after every probe in the
//! battery passes. The [`ContractVerdict`] is cached until reset.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_gate::{ContractCheck, ContractGate};
//!
//! let gate = ContractGate::new("http://candidate:8080")?;
//! let verdict = gate.verify().await;
//! if !verdict.is_pass() {
//!     eprintln!("failing: {:?}", verdict.failing_endpoints());
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod gate;
mod probe;
mod verdict;

pub use error::GateError;
pub use gate::{ContractCheck, ContractGate, DEFAULT_PROBE_TIMEOUT};
pub use probe::{default_battery, EndpointProbe, ProbeMethod, ProbeRule};
pub use verdict::{ContractVerdict, ProbeFailure, Verdict};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
