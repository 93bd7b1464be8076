//! The `UpstreamTransport` trait: the seam between ranking/forwarding logic
//! and the network.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Raw upstream answer. The status is not judged by the transport.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends an opaque JSON-RPC payload to one upstream URL.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; one instance is shared by every
/// forwarder and by the prober.
///
/// # Cancellation
/// Dropping the returned future must abort the in-flight request.
#[async_trait]
pub trait UpstreamTransport: Send + Sync + 'static {
    /// POST `body` to `url` as `application/json`, bounded by `timeout`.
    async fn post(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError>;
}
