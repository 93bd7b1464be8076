//! Proxy configuration, read once at startup from a YAML file.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Candidate upstreams for one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Upstream JSON-RPC URLs, in preference order for tie-breaking.
    pub endpoints: Vec<String>,
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Port the proxy frontend listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between the end of one refresh round and the start of the next.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Upper bound for a single latency probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Upper bound for a single forwarding attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Forwarders kept idle in the pool between requests.
    #[serde(default = "default_max_idle_forwarders")]
    pub max_idle_forwarders: usize,
    /// Largest request body the frontend will buffer and forward.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Mark an endpoint unhealthy when its `eth_chainId` disagrees with the
    /// network it is configured under.
    #[serde(default = "bool_true")]
    pub verify_chain_id: bool,
    #[serde(default)]
    pub log: LogConfig,
    /// network id → endpoints
    pub networks: BTreeMap<u64, NetworkConfig>,
}

fn default_port() -> u16 { 5121 }
fn default_refresh_interval_secs() -> u64 { 60 }
fn default_probe_timeout_ms() -> u64 { 5_000 }
fn default_attempt_timeout_ms() -> u64 { 15_000 }
fn default_max_idle_forwarders() -> usize { 64 }
fn default_max_request_bytes() -> usize { 10 * 1024 * 1024 }
fn bool_true() -> bool { true }

impl ProxyConfig {
    /// A config with defaults for every tunable and the given networks.
    pub fn with_networks(networks: BTreeMap<u64, NetworkConfig>) -> Self {
        Self {
            port: default_port(),
            refresh_interval_secs: default_refresh_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_idle_forwarders: default_max_idle_forwarders(),
            max_request_bytes: default_max_request_bytes(),
            verify_chain_id: true,
            log: LogConfig::default(),
            networks,
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Reject values the proxy cannot run with. Per-endpoint checks live in
    /// [`EndpointRegistry::from_config`](crate::registry::EndpointRegistry::from_config).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(ConfigError::Invalid("no networks configured".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid("refresh_interval_secs must be > 0".into()));
        }
        if self.probe_timeout_ms == 0 || self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid("max_request_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}
