//! Kiln configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [engine]
//! name = "primary"
//! url = "http://engine.internal:8080"
//! timeout_secs = 180
//!
//! [shadow]
//! enabled = true
//! url = "http://candidate.internal:8080"
//! projects = ["demo"]
//! run_log_capacity = 1024
//!
//! [store]
//! kind = "fs"
//! path = "./kiln-data"
//! ```

use crate::error::ConfigError;
use crate::runs::DEFAULT_RUN_LOG_CAPACITY;
use kiln_artifact::ProjectId;
use kiln_engine::{DEFAULT_CONTEXT_WINDOW, DEFAULT_ENGINE_TIMEOUT};
use kiln_gate::{EndpointProbe, DEFAULT_PROBE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kiln configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Primary engine
    pub engine: EngineConfig,
    /// Candidate engine run in shadow mode
    pub shadow: ShadowConfig,
    /// Contract gate for the candidate
    pub gate: GateConfig,
    /// Version store
    pub store: StoreConfig,
    /// Prior-context window
    pub conversation: ConversationConfig,
}

impl KilnConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML for this schema
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// Returns `Invalid` describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.timeout_secs == 0 {
            return Err(ConfigError::Invalid("engine.timeout_secs must be positive".into()));
        }
        if self.shadow.enabled && self.shadow.url.is_none() {
            return Err(ConfigError::Invalid("shadow.enabled requires shadow.url".into()));
        }
        if self.store.kind == StoreKind::Fs && self.store.path.is_none() {
            return Err(ConfigError::Invalid("store.kind = \"fs\" requires store.path".into()));
        }
        Ok(())
    }

    /// With primary engine URL
    #[inline]
    #[must_use]
    pub fn with_engine_url(mut self, url: impl Into<String>) -> Self {
        self.engine.url = url.into();
        self
    }

    /// With per-submission timeout
    #[inline]
    #[must_use]
    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With shadow mode enabled against `url`
    #[inline]
    #[must_use]
    pub fn with_shadow(mut self, url: impl Into<String>) -> Self {
        self.shadow.enabled = true;
        self.shadow.url = Some(url.into());
        self
    }

    /// With on-disk version store at `path`
    #[inline]
    #[must_use]
    pub fn with_fs_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.kind = StoreKind::Fs;
        self.store.path = Some(path.into());
        self
    }

    /// With prior-context window
    #[inline]
    #[must_use]
    pub fn with_context_window(mut self, window: usize) -> Self {
        self.conversation.window = window;
        self
    }
}

/// Primary engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    pub url: String,
    pub timeout_secs: u64,
    /// Backend accepts `POST /v1/cancel/{job}`
    pub supports_cancel: bool,
}

impl EngineConfig {
    /// Timeout as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            url: "http://127.0.0.1:8080".to_string(),
            timeout_secs: DEFAULT_ENGINE_TIMEOUT.as_secs(),
            supports_cancel: false,
        }
    }
}

/// Shadow mode settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    pub enabled: bool,
    pub name: String,
    pub url: Option<String>,
    /// Restrict shadow runs to these projects; empty means all
    pub projects: Vec<ProjectId>,
    pub timeout_secs: u64,
    /// Engine runs kept in memory before the oldest finished ones are dropped
    pub run_log_capacity: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "candidate".to_string(),
            url: None,
            projects: Vec::new(),
            timeout_secs: DEFAULT_ENGINE_TIMEOUT.as_secs(),
            run_log_capacity: DEFAULT_RUN_LOG_CAPACITY,
        }
    }
}

/// Contract gate settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub probe_timeout_secs: u64,
    /// Replaces the default battery when non-empty
    pub probes: Vec<EndpointProbe>,
}

impl GateConfig {
    /// Probe timeout as a duration
    #[inline]
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            probes: Vec::new(),
        }
    }
}

/// Version store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Fs,
}

/// Version store settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: Option<PathBuf>,
}

/// Conversation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Turns sent to the engine as prior context
    pub window: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}
