//! chainproxy-core: ranking, refresh and forwarding for a multi-chain
//! JSON-RPC proxy.
//!
//! # Overview
//!
//! Each network has a fixed list of upstream endpoints. A background
//! [`RefreshScheduler`] periodically asks the [`ChainManager`] to probe every
//! endpoint of every network and publish a new latency-ordered
//! [`RankedEndpointList`]. Inbound requests borrow a [`Forwarder`] from the
//! [`ForwarderPool`] and walk the current ranking in order until an endpoint
//! answers.
//!
//! - [`EndpointRegistry`]: validated static network → endpoints map
//! - [`LatencyProber`]: measures one endpoint; [`TransportProber`] is the default
//! - [`UpstreamTransport`]: HTTP seam, implemented by `chainproxy-http`
//! - [`ProxyError`]: caller-facing errors

pub mod chain_manager;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod pool;
pub mod prober;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use chain_manager::ChainManager;
pub use config::{LogConfig, NetworkConfig, ProxyConfig};
pub use error::{AttemptFailure, ConfigError, FailureKind, ProxyError, TransportError};
pub use forwarder::Forwarder;
pub use pool::{ForwarderPool, PoolStats, PooledForwarder};
pub use prober::{LatencyProber, TransportProber};
pub use registry::EndpointRegistry;
pub use request::{JsonRpcRequest, JsonRpcResponse, PROBE_METHOD};
pub use scheduler::{RefreshScheduler, SchedulerState};
pub use transport::{UpstreamResponse, UpstreamTransport};
pub use types::{Endpoint, LatencyRecord, NetworkId, RankedEndpointList};
