//! Latency probing: one side-effect-free round trip per endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::request::{parse_hex_quantity, JsonRpcRequest, JsonRpcResponse};
use crate::transport::UpstreamTransport;
use crate::types::Endpoint;

/// Measures how long an endpoint takes to produce a valid response.
///
/// Stateless; the Chain Manager bounds every call with its own timeout and
/// drops the future on expiry.
#[async_trait]
pub trait LatencyProber: Send + Sync + 'static {
    async fn probe(&self, endpoint: &Endpoint) -> Result<Duration, TransportError>;
}

/// Default prober: sends `eth_chainId` through an [`UpstreamTransport`].
pub struct TransportProber {
    transport: Arc<dyn UpstreamTransport>,
    timeout: Duration,
    verify_chain_id: bool,
    payload: Bytes,
}

impl TransportProber {
    pub fn new(transport: Arc<dyn UpstreamTransport>, timeout: Duration) -> Self {
        // Serializing a fixed request cannot fail.
        let payload = serde_json::to_vec(&JsonRpcRequest::chain_id_probe()).unwrap_or_default();
        Self {
            transport,
            timeout,
            verify_chain_id: true,
            payload: Bytes::from(payload),
        }
    }

    /// Toggle the check that the reported chain id matches the endpoint's network.
    pub fn verify_chain_id(mut self, enabled: bool) -> Self {
        self.verify_chain_id = enabled;
        self
    }

    fn validate(&self, endpoint: &Endpoint, body: &[u8]) -> Result<(), TransportError> {
        let resp: JsonRpcResponse = serde_json::from_slice(body).map_err(|e| {
            TransportError::InvalidResponse(format!("not a JSON-RPC response: {e}"))
        })?;
        if resp.jsonrpc != "2.0" {
            return Err(TransportError::InvalidResponse(format!(
                "unsupported jsonrpc version {:?}",
                resp.jsonrpc
            )));
        }
        if let Some(err) = resp.error {
            return Err(TransportError::InvalidResponse(err.to_string()));
        }
        let result = resp
            .result
            .ok_or_else(|| TransportError::InvalidResponse("response has no result".into()))?;

        if self.verify_chain_id {
            let reported = result
                .as_str()
                .and_then(parse_hex_quantity)
                .ok_or_else(|| {
                    TransportError::InvalidResponse(format!("unexpected chain id result {result}"))
                })?;
            if reported != endpoint.network_id.0 {
                return Err(TransportError::InvalidResponse(format!(
                    "endpoint serves chain {reported}, expected {}",
                    endpoint.network_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LatencyProber for TransportProber {
    async fn probe(&self, endpoint: &Endpoint) -> Result<Duration, TransportError> {
        let start = Instant::now();
        let resp = self
            .transport
            .post(&endpoint.url, self.payload.clone(), self.timeout)
            .await?;
        let elapsed = start.elapsed();

        if !resp.is_success() {
            return Err(TransportError::Status {
                status: resp.status,
            });
        }
        self.validate(endpoint, &resp.body)?;
        Ok(elapsed)
    }
}
