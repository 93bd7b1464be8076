//! Upstream transport backed by a shared `reqwest` connection pool.
//!
//! Bodies are posted and returned verbatim. No retries happen here; fallback
//! across endpoints belongs to the forwarder.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use chainproxy_core::error::TransportError;
use chainproxy_core::transport::{UpstreamResponse, UpstreamTransport};
use reqwest::header::{CONTENT_TYPE, HeaderValue};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Bound on establishing a TCP/TLS connection, within the per-call timeout.
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            user_agent: concat!("chainproxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// POSTs JSON bodies to any upstream URL over one shared client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build the shared client.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(HttpTransportConfig::default())
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        }
    } else if error.is_connect() {
        TransportError::ConnectionRefused(error.to_string())
    } else if error.is_body() || error.is_decode() {
        TransportError::InvalidResponse(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError> {
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.bytes().await.map_err(|e| classify(e, timeout))?;

        tracing::trace!(url, status, bytes = body.len(), "upstream responded");
        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}
