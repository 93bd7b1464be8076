//! chainproxy CLI: run the multi-chain RPC proxy or inspect endpoints.
//!
//! Usage:
//! ```bash
//! # Run the proxy
//! chainproxy serve --config chainproxy.yaml
//!
//! # Measure one endpoint
//! chainproxy probe --url https://cloudflare-eth.com --network 1
//!
//! # Probe every configured endpoint once and print the rankings
//! chainproxy rank --config chainproxy.yaml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chainproxy_core::{
    ChainManager, Endpoint, EndpointRegistry, LatencyProber, NetworkId, ProxyConfig,
    TransportProber,
};
use chainproxy_http::HttpTransport;
use chainproxy_server::{init_tracing, ProxyServer};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "chainproxy",
    about = "Latency-ranked JSON-RPC reverse proxy for many chains",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy until Ctrl-C
    Serve {
        /// Path to the YAML configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe a single endpoint with eth_chainId
    Probe {
        #[arg(long)]
        url: String,
        /// Expected chain id; when set, a mismatch is reported as a failure
        #[arg(long)]
        network: Option<u64>,
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },

    /// Probe every configured endpoint once and print each network's ranking
    Rank {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, port } => cmd_serve(config, port).await,
        Commands::Probe {
            url,
            network,
            timeout_ms,
        } => cmd_probe(url, network, timeout_ms).await,
        Commands::Rank { config } => cmd_rank(config).await,
    }
}

fn load(path: &Path) -> Result<ProxyConfig> {
    ProxyConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

async fn cmd_serve(path: PathBuf, port: Option<u16>) -> Result<()> {
    let mut config = load(&path)?;
    if let Some(port) = port {
        config.port = port;
    }
    init_tracing(&config.log);

    let server = ProxyServer::build(config)?;
    let shutdown = CancellationToken::new();

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
        }
        on_signal.cancel();
    });

    server.run(shutdown).await
}

async fn cmd_probe(url: String, network: Option<u64>, timeout_ms: u64) -> Result<()> {
    let transport = Arc::new(HttpTransport::with_defaults()?);
    let prober = TransportProber::new(transport, Duration::from_millis(timeout_ms))
        .verify_chain_id(network.is_some());
    let endpoint = Endpoint::new(url.clone(), NetworkId(network.unwrap_or_default()));

    println!("Probing {url}...");
    match prober.probe(&endpoint).await {
        Ok(latency) => {
            println!("  Status:  OK");
            println!("  Latency: {}ms", latency.as_millis());
            Ok(())
        }
        Err(e) => {
            println!("  Status:  {}", e.kind());
            println!("  Reason:  {e}");
            anyhow::bail!("probe failed")
        }
    }
}

async fn cmd_rank(path: PathBuf) -> Result<()> {
    let config = load(&path)?;
    let registry = EndpointRegistry::from_config(&config)?;
    let transport = Arc::new(HttpTransport::with_defaults()?);
    let prober = TransportProber::new(transport, config.probe_timeout())
        .verify_chain_id(config.verify_chain_id);
    let manager = ChainManager::new(&registry, Arc::new(prober), config.probe_timeout());

    for network_id in manager.network_ids() {
        let ranking = manager.refresh_ranking(network_id).await?;
        println!(
            "network {network_id}: {}/{} healthy",
            ranking.healthy_count(),
            ranking.len()
        );
        for (rank, record) in ranking.records().iter().enumerate() {
            let latency = record
                .latency
                .map(|d| format!("{}ms", d.as_millis()))
                .unwrap_or_else(|| "-".into());
            let failure = record
                .last_failure
                .map(|k| format!(" ({k})"))
                .unwrap_or_default();
            println!("  {:>2}. {:<8} {}{failure}", rank + 1, latency, record.endpoint.url);
        }
    }
    Ok(())
}
