//! Per-network endpoint rankings, refreshed by probing and read lock-free.
//!
//! Each network owns its own slot: the configured endpoints, the published
//! [`RankedEndpointList`] behind an [`ArcSwap`], and an async mutex that
//! serializes refreshes of that network only. Readers never take a lock;
//! refreshes of different networks never contend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, TransportError};
use crate::prober::LatencyProber;
use crate::registry::EndpointRegistry;
use crate::types::{Endpoint, NetworkId, RankedEndpointList};

struct NetworkSlot {
    endpoints: Vec<Endpoint>,
    ranking: ArcSwap<RankedEndpointList>,
    /// Held for the whole refresh; guards the last published round number.
    refresh_lock: Mutex<u64>,
}

pub struct ChainManager {
    networks: BTreeMap<NetworkId, NetworkSlot>,
    prober: Arc<dyn LatencyProber>,
    probe_timeout: Duration,
}

impl ChainManager {
    /// Create the manager with one unprobed snapshot per configured network.
    pub fn new(
        registry: &EndpointRegistry,
        prober: Arc<dyn LatencyProber>,
        probe_timeout: Duration,
    ) -> Self {
        let networks = registry
            .iter()
            .map(|(id, endpoints)| {
                let slot = NetworkSlot {
                    endpoints: endpoints.to_vec(),
                    ranking: ArcSwap::from_pointee(RankedEndpointList::unprobed(id, endpoints)),
                    refresh_lock: Mutex::new(0),
                };
                (id, slot)
            })
            .collect();

        Self {
            networks,
            prober,
            probe_timeout,
        }
    }

    /// Every configured network, ascending. Fixed for the manager's lifetime.
    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.networks.keys().copied().collect()
    }

    fn slot(&self, network_id: NetworkId) -> Result<&NetworkSlot, ProxyError> {
        self.networks
            .get(&network_id)
            .ok_or(ProxyError::UnknownNetwork { network_id })
    }

    /// Current snapshot for a network.
    pub fn ranking(&self, network_id: NetworkId) -> Result<Arc<RankedEndpointList>, ProxyError> {
        Ok(self.slot(network_id)?.ranking.load_full())
    }

    /// Current snapshots for every network, ascending by network id.
    pub fn rankings(&self) -> Vec<Arc<RankedEndpointList>> {
        self.networks
            .values()
            .map(|slot| slot.ranking.load_full())
            .collect()
    }

    /// Probe every endpoint of `network_id` concurrently, rank them and
    /// publish the result atomically.
    ///
    /// Concurrent calls for the same network are serialized; the last one to
    /// complete is the published snapshot.
    pub async fn refresh_ranking(
        &self,
        network_id: NetworkId,
    ) -> Result<Arc<RankedEndpointList>, ProxyError> {
        let slot = self.slot(network_id)?;
        let mut round = slot.refresh_lock.lock().await;

        let probes = slot.endpoints.iter().map(|endpoint| self.probe_one(endpoint));
        let outcomes = join_all(probes).await;

        *round += 1;
        let ranking = Arc::new(RankedEndpointList::from_probes(
            network_id,
            outcomes,
            Utc::now(),
            *round,
        ));
        slot.ranking.store(Arc::clone(&ranking));

        info!(
            network_id = %network_id,
            round = *round,
            healthy = ranking.healthy_count(),
            total = ranking.len(),
            best = ranking.endpoints().next().map(|e| e.url.as_str()).unwrap_or("-"),
            "ranking refreshed"
        );
        Ok(ranking)
    }

    async fn probe_one(&self, endpoint: &Endpoint) -> (Endpoint, Result<Duration, TransportError>) {
        let probe = self.prober.probe(endpoint);
        let outcome = match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(self.probe_timeout)),
        };

        match &outcome {
            Ok(latency) => debug!(
                network_id = %endpoint.network_id,
                url = %endpoint.url,
                latency_ms = latency.as_millis() as u64,
                "probe ok"
            ),
            Err(e) => warn!(
                network_id = %endpoint.network_id,
                url = %endpoint.url,
                kind = %e.kind(),
                error = %e,
                "probe failed"
            ),
        }
        (endpoint.clone(), outcome)
    }
}

impl std::fmt::Debug for ChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainManager")
            .field("networks", &self.network_ids())
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}
