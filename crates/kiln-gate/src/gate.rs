//! Contract gate
//!
//! The verdict is computed lazily on the first `verify` and then cached
//! until `reset`. It is never recomputed on its own, so a flaky candidate
//! cannot flap shadow execution on and off mid-run. Concurrent `verify`
//! calls share a single probe run. A `reset` that lands while verification
//! is in flight wins: the stale verdict is returned to its caller but not
//! cached.

use crate::error::GateError;
use crate::probe::{default_battery, EndpointProbe, ProbeMethod};
use crate::verdict::{ContractVerdict, ProbeFailure};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for a single probe request
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the shadow-execution verdict
#[async_trait]
pub trait ContractCheck: Send + Sync + Debug {
    /// Cached verdict, probing first if there is none
    async fn verify(&self) -> ContractVerdict;

    /// Cached verdict without probing
    fn cached(&self) -> Option<ContractVerdict>;

    /// Forget the cached verdict; the next `verify` probes again
    fn reset(&self);
}

/// Cached verdict tagged with the reset generation it was computed in
#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    verdict: Option<ContractVerdict>,
}

/// Probes a candidate engine over HTTP
#[derive(Debug)]
pub struct ContractGate {
    base_url: String,
    client: reqwest::Client,
    battery: Vec<EndpointProbe>,
    probe_timeout: Duration,
    slot: RwLock<Slot>,
    probing: Mutex<()>,
}

impl ContractGate {
    /// Gate for the engine at `base_url` with the default battery
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self, GateError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GateError::Client(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            battery: default_battery(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            slot: RwLock::new(Slot::default()),
            probing: Mutex::new(()),
        })
    }

    /// Replace the probe battery
    ///
    /// # Errors
    /// Returns error if `battery` is empty
    pub fn with_battery(mut self, battery: Vec<EndpointProbe>) -> Result<Self, GateError> {
        if battery.is_empty() {
            return Err(GateError::EmptyBattery);
        }
        self.battery = battery;
        Ok(self)
    }

    /// Per-probe timeout
    #[inline]
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Probes in use
    #[inline]
    #[must_use]
    pub fn battery(&self) -> &[EndpointProbe] {
        &self.battery
    }

    async fn probe_all(&self) -> ContractVerdict {
        let results = join_all(self.battery.iter().map(|probe| self.probe(probe))).await;
        let failures = self
            .battery
            .iter()
            .zip(results)
            .filter_map(|(probe, result)| {
                result.err().map(|reason| ProbeFailure {
                    endpoint: probe.name.clone(),
                    reason,
                })
            })
            .collect();
        ContractVerdict::from_failures(failures)
    }

    async fn probe(&self, probe: &EndpointProbe) -> Result<(), String> {
        let url = format!("{}{}", self.base_url, probe.path);
        let request = match probe.method {
            ProbeMethod::Get => self.client.get(&url),
            ProbeMethod::Post => self
                .client
                .post(&url)
                .json(probe.body.as_ref().unwrap_or(&serde_json::Value::Null)),
        };
        let response = request
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("timed out after {}s", self.probe_timeout.as_secs())
                } else {
                    format!("transport error: {e}")
                }
            })?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let result = probe.evaluate(status, &body);
        tracing::debug!(endpoint = %probe.name, status, passed = result.is_ok(), "probe finished");
        result
    }
}

#[async_trait]
impl ContractCheck for ContractGate {
    async fn verify(&self) -> ContractVerdict {
        if let Some(verdict) = self.cached() {
            return verdict;
        }
        let _probing = self.probing.lock().await;
        let generation = {
            let slot = self.slot.read();
            if let Some(verdict) = &slot.verdict {
                return verdict.clone();
            }
            slot.generation
        };

        let verdict = self.probe_all().await;
        if verdict.is_pass() {
            tracing::info!(base_url = %self.base_url, "contract gate passed");
        } else {
            tracing::warn!(
                base_url = %self.base_url,
                failing = ?verdict.failing_endpoints(),
                "contract gate failed, shadow execution disabled"
            );
        }
        let mut slot = self.slot.write();
        if slot.generation == generation {
            slot.verdict = Some(verdict.clone());
        } else {
            tracing::debug!(base_url = %self.base_url, "gate reset while verifying, verdict not cached");
        }
        verdict
    }

    fn cached(&self) -> Option<ContractVerdict> {
        self.slot.read().verdict.clone()
    }

    fn reset(&self) {
        let mut slot = self.slot.write();
        slot.generation += 1;
        if slot.verdict.take().is_some() {
            tracing::info!(base_url = %self.base_url, "contract verdict reset");
        }
    }
}
