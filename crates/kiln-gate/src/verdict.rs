//! Contract verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a gate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    /// Not yet verified
    Unknown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Unknown => "unknown",
        })
    }
}

/// One failed endpoint check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub endpoint: String,
    pub reason: String,
}

/// Cached result of probing a candidate engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractVerdict {
    pub verdict: Verdict,
    #[serde(default)]
    pub failures: Vec<ProbeFailure>,
    #[serde(default)]
    pub computed_at: Option<DateTime<Utc>>,
}

impl ContractVerdict {
    /// Nothing verified yet
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            verdict: Verdict::Unknown,
            failures: Vec::new(),
            computed_at: None,
        }
    }

    /// Pass iff `failures` is empty, stamped now
    #[must_use]
    pub fn from_failures(failures: Vec<ProbeFailure>) -> Self {
        Self {
            verdict: if failures.is_empty() {
                Verdict::Pass
            } else {
                Verdict::Fail
            },
            failures,
            computed_at: Some(Utc::now()),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Names of the endpoints that failed
    #[must_use]
    pub fn failing_endpoints(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.endpoint.as_str()).collect()
    }
}

impl Default for ContractVerdict {
    fn default() -> Self {
        Self::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_follows_failures() {
        assert!(ContractVerdict::from_failures(Vec::new()).is_pass());

        let failed = ContractVerdict::from_failures(vec![ProbeFailure {
            endpoint: "health".into(),
            reason: "server error (HTTP 500)".into(),
        }]);
        assert_eq!(failed.verdict, Verdict::Fail);
        assert_eq!(failed.failing_endpoints(), vec!["health"]);

        let unknown = ContractVerdict::default();
        assert!(!unknown.is_pass());
        assert!(unknown.computed_at.is_none());
    }
}
