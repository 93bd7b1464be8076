//! Static per-network list of candidate upstreams, loaded once from config.

use std::collections::{BTreeMap, HashSet};

use crate::config::ProxyConfig;
use crate::error::ConfigError;
use crate::types::{Endpoint, NetworkId};

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    networks: BTreeMap<NetworkId, Vec<Endpoint>>,
}

impl EndpointRegistry {
    /// Build the registry, rejecting empty networks, non-http(s) URLs and
    /// URLs listed twice for the same network.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for (&id, network) in &config.networks {
            registry.insert(NetworkId(id), network.endpoints.iter().map(String::as_str))?;
        }
        Ok(registry)
    }

    /// Register the endpoints of one network. Used by `from_config` and tests.
    pub fn insert<'a>(
        &mut self,
        network_id: NetworkId,
        urls: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let mut endpoints = Vec::new();

        for raw in urls {
            let parsed = url::Url::parse(raw).map_err(|e| {
                ConfigError::Invalid(format!("network {network_id}: bad endpoint url {raw:?}: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "network {network_id}: endpoint {raw:?} must use http or https"
                )));
            }
            if !seen.insert(raw) {
                return Err(ConfigError::Invalid(format!(
                    "network {network_id}: endpoint {raw:?} listed twice"
                )));
            }
            endpoints.push(Endpoint::new(raw, network_id));
        }

        if endpoints.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "network {network_id} has no endpoints"
            )));
        }
        self.networks.insert(network_id, endpoints);
        Ok(())
    }

    /// Every configured network, ascending.
    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.networks.keys().copied().collect()
    }

    /// Endpoints of one network in configuration order.
    pub fn endpoints(&self, network_id: NetworkId) -> Option<&[Endpoint]> {
        self.networks.get(&network_id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetworkId, &[Endpoint])> {
        self.networks.iter().map(|(id, eps)| (*id, eps.as_slice()))
    }

    /// Number of networks.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}
