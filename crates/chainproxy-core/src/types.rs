//! Core data model: network identifiers, endpoints and ranked snapshots.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FailureKind, ProxyError, TransportError};

/// Identifier of a target blockchain network (an EVM chain id in practice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NetworkId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Accepts plain ASCII digits only: no sign, no whitespace, no hex.
impl FromStr for NetworkId {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ProxyError::MalformedNetworkId {
            value: s.to_string(),
        };
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        s.parse::<u64>().map(Self).map_err(|_| malformed())
    }
}

/// One configured upstream RPC URL for a network. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub url: String,
    pub network_id: NetworkId,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, network_id: NetworkId) -> Self {
        Self {
            url: url.into(),
            network_id,
        }
    }
}

/// Latest probe outcome for one endpoint.
#[derive(Debug, Clone)]
pub struct LatencyRecord {
    pub endpoint: Endpoint,
    /// `None` when the endpoint was unreachable or has not been probed yet.
    pub latency: Option<Duration>,
    pub last_probed_at: Option<DateTime<Utc>>,
    pub healthy: bool,
    pub last_failure: Option<FailureKind>,
}

impl LatencyRecord {
    fn unprobed(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            latency: None,
            last_probed_at: None,
            healthy: true,
            last_failure: None,
        }
    }
}

/// Immutable, ordered snapshot of a network's endpoints: healthy endpoints
/// by ascending latency, then unhealthy ones in configuration order.
///
/// Snapshots are replaced wholesale on every refresh and shared behind an
/// `Arc`, so a reader always sees one complete probe round.
#[derive(Debug, Clone)]
pub struct RankedEndpointList {
    network_id: NetworkId,
    records: Vec<LatencyRecord>,
    round: u64,
    refreshed_at: Option<DateTime<Utc>>,
}

impl RankedEndpointList {
    /// Snapshot published before the first probe round: configuration order,
    /// every endpoint assumed healthy.
    pub fn unprobed(network_id: NetworkId, endpoints: &[Endpoint]) -> Self {
        Self {
            network_id,
            records: endpoints.iter().cloned().map(LatencyRecord::unprobed).collect(),
            round: 0,
            refreshed_at: None,
        }
    }

    /// Build a ranking from probe outcomes given in configuration order.
    pub fn from_probes(
        network_id: NetworkId,
        outcomes: Vec<(Endpoint, Result<Duration, TransportError>)>,
        probed_at: DateTime<Utc>,
        round: u64,
    ) -> Self {
        let mut healthy = Vec::with_capacity(outcomes.len());
        let mut unhealthy = Vec::new();

        for (endpoint, outcome) in outcomes {
            match outcome {
                Ok(latency) => healthy.push(LatencyRecord {
                    endpoint,
                    latency: Some(latency),
                    last_probed_at: Some(probed_at),
                    healthy: true,
                    last_failure: None,
                }),
                Err(e) => unhealthy.push(LatencyRecord {
                    endpoint,
                    latency: None,
                    last_probed_at: Some(probed_at),
                    healthy: false,
                    last_failure: Some(e.kind()),
                }),
            }
        }

        // Stable sort: equal latencies keep configuration order.
        healthy.sort_by_key(|r| r.latency);
        healthy.extend(unhealthy);

        Self {
            network_id,
            records: healthy,
            round,
            refreshed_at: Some(probed_at),
        }
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn records(&self) -> &[LatencyRecord] {
        &self.records
    }

    /// Endpoints in forwarding order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.records.iter().map(|r| &r.endpoint)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.records.iter().filter(|r| r.healthy).count()
    }

    /// Probe round that produced this snapshot; 0 before the first refresh.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}
