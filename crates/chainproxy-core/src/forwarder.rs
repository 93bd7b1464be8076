//! Ordered fallback forwarding over a network's current ranking.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::IgnoredAny;
use tracing::{debug, warn};

use crate::chain_manager::ChainManager;
use crate::error::{AttemptFailure, ProxyError, TransportError};
use crate::transport::{UpstreamResponse, UpstreamTransport};
use crate::types::{Endpoint, NetworkId};

/// Walks a ranking until one endpoint answers with a well-formed response.
///
/// Forwarding failures never touch the ranking; demotion only happens on the
/// next refresh round. Instances are pooled by
/// [`ForwarderPool`](crate::pool::ForwarderPool) and carry no state between
/// requests.
pub struct Forwarder {
    manager: Arc<ChainManager>,
    transport: Arc<dyn UpstreamTransport>,
    attempt_timeout: Duration,
    failures: Vec<AttemptFailure>,
}

impl Forwarder {
    pub fn new(
        manager: Arc<ChainManager>,
        transport: Arc<dyn UpstreamTransport>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            transport,
            attempt_timeout,
            failures: Vec::new(),
        }
    }

    /// Forward `payload` verbatim to the best endpoint of `network_id`,
    /// falling back down the ranking on failure.
    ///
    /// Returns the first successful upstream response unmodified, or
    /// `AllEndpointsExhausted` with one failure per attempted endpoint.
    pub async fn forward(
        &mut self,
        network_id: NetworkId,
        payload: Bytes,
    ) -> Result<UpstreamResponse, ProxyError> {
        self.failures.clear();
        let ranking = self.manager.ranking(network_id)?;

        for endpoint in ranking.endpoints() {
            match self.attempt(endpoint, payload.clone()).await {
                Ok(resp) => {
                    debug!(
                        network_id = %network_id,
                        url = %endpoint.url,
                        status = resp.status,
                        fallbacks = self.failures.len(),
                        "forwarded"
                    );
                    self.failures.clear();
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(
                        network_id = %network_id,
                        url = %endpoint.url,
                        kind = %e.kind(),
                        error = %e,
                        "attempt failed, falling back"
                    );
                    self.failures.push(AttemptFailure::new(&endpoint.url, &e));
                }
            }
        }

        Err(ProxyError::AllEndpointsExhausted {
            network_id,
            failures: std::mem::take(&mut self.failures),
        })
    }

    async fn attempt(
        &self,
        endpoint: &Endpoint,
        payload: Bytes,
    ) -> Result<UpstreamResponse, TransportError> {
        let send = self
            .transport
            .post(&endpoint.url, payload, self.attempt_timeout);
        let resp = tokio::time::timeout(self.attempt_timeout, send)
            .await
            .map_err(|_| TransportError::timeout(self.attempt_timeout))??;

        if !resp.is_success() {
            return Err(TransportError::Status {
                status: resp.status,
            });
        }
        serde_json::from_slice::<IgnoredAny>(&resp.body)
            .map_err(|e| TransportError::InvalidResponse(format!("body is not JSON: {e}")))?;
        Ok(resp)
    }

    /// Drop anything left over from an interrupted request.
    pub(crate) fn reset(&mut self) {
        self.failures.clear();
    }

    #[cfg(test)]
    pub(crate) fn pending_failures(&self) -> usize {
        self.failures.len()
    }
}
