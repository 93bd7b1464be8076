//! Wiring and lifecycle: build every component from a [`ProxyConfig`],
//! serve until cancelled, then drain the refresh scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chainproxy_core::{
    ChainManager, EndpointRegistry, ForwarderPool, ProxyConfig, RefreshScheduler, TransportProber,
    UpstreamTransport,
};
use chainproxy_http::HttpTransport;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::{router, AppState};

pub struct ProxyServer {
    config: ProxyConfig,
    state: AppState,
}

impl ProxyServer {
    /// Build the proxy with the `reqwest` transport.
    pub fn build(config: ProxyConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::with_defaults().context("building HTTP transport")?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build the proxy over any transport; shared by the prober and the pool.
    pub fn with_transport(
        config: ProxyConfig,
        transport: Arc<dyn UpstreamTransport>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let registry = EndpointRegistry::from_config(&config).context("invalid endpoint list")?;

        let prober = TransportProber::new(Arc::clone(&transport), config.probe_timeout())
            .verify_chain_id(config.verify_chain_id);
        let manager = Arc::new(ChainManager::new(
            &registry,
            Arc::new(prober),
            config.probe_timeout(),
        ));
        let pool = ForwarderPool::new(
            Arc::clone(&manager),
            transport,
            config.attempt_timeout(),
            config.max_idle_forwarders,
        );
        let scheduler = RefreshScheduler::new(Arc::clone(&manager), config.refresh_interval());

        let max_request_bytes = config.max_request_bytes;
        Ok(Self {
            config,
            state: AppState {
                manager,
                pool,
                scheduler,
                max_request_bytes,
            },
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind `0.0.0.0:<port>` and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// Starts the refresh scheduler, stops accepting on cancellation, lets
    /// in-flight requests finish, and waits for the scheduler's current
    /// round before returning.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().context("reading bound address")?;
        info!(
            address = %addr,
            networks = self.state.manager.network_ids().len(),
            "proxy listening"
        );

        let scheduler = Arc::clone(&self.state.scheduler);
        let refresh = scheduler.spawn(shutdown.clone());

        let signal = shutdown.clone();
        let served = axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

        // A server error must not leave the scheduler running.
        shutdown.cancel();
        if let Err(e) = refresh.await {
            error!(error = %e, "refresh scheduler task failed");
        }

        served.context("serving HTTP")?;
        info!(rounds = scheduler.rounds_completed(), "proxy stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chainproxy_core::{
        NetworkConfig, NetworkId, SchedulerState, TransportError, UpstreamResponse,
    };
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Every upstream reports chain 1 and echoes forwarded bodies.
    struct EchoUpstream;

    #[async_trait]
    impl UpstreamTransport for EchoUpstream {
        async fn post(
            &self,
            _url: &str,
            body: Bytes,
            _timeout: Duration,
        ) -> Result<UpstreamResponse, TransportError> {
            let body = if body.windows(11).any(|w| w == b"eth_chainId") {
                Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
            } else {
                body
            };
            Ok(UpstreamResponse {
                status: 200,
                content_type: Some("application/json".into()),
                body,
            })
        }
    }

    fn config() -> ProxyConfig {
        let mut networks = BTreeMap::new();
        networks.insert(
            1,
            NetworkConfig {
                endpoints: vec!["http://a.example".into(), "http://b.example".into()],
            },
        );
        ProxyConfig::with_networks(networks)
    }

    #[test]
    fn rejects_invalid_endpoint_urls() {
        let mut config = config();
        config.networks.insert(
            5,
            NetworkConfig {
                endpoints: vec!["ftp://nope.example".into()],
            },
        );
        assert!(ProxyServer::with_transport(config, Arc::new(EchoUpstream)).is_err());
    }

    #[tokio::test]
    async fn serves_until_cancelled_then_drains_scheduler() {
        let server = ProxyServer::with_transport(config(), Arc::new(EchoUpstream)).unwrap();
        let state = server.state().clone();
        assert_eq!(state.max_request_bytes, 10 * 1024 * 1024);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(server.serve(listener, shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while state.scheduler.rounds_completed() < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("initial refresh");
        let ranking = state.manager.ranking(NetworkId(1)).unwrap();
        assert_eq!(ranking.healthy_count(), 2);

        let client = reqwest::Client::new();
        let health = client
            .get(format!("http://{addr}/health-check"))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), r#"{"status":"UP"}"#);

        let payload = r#"{"jsonrpc":"2.0","id":3,"method":"eth_gasPrice"}"#;
        let forwarded = client
            .post(format!("http://{addr}/rpc/1"))
            .body(payload)
            .send()
            .await
            .unwrap();
        assert_eq!(forwarded.status(), 200);
        assert_eq!(forwarded.text().await.unwrap(), payload);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("server stops after cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(state.scheduler.state(), SchedulerState::Terminated);
    }
}
