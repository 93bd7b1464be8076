//! Error taxonomy: per-attempt transport failures, caller-facing proxy
//! errors, and configuration errors.

use serde::Serialize;
use thiserror::Error;

use crate::types::NetworkId;

/// Classification of a single failed probe or forwarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    InvalidResponse,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionRefused => write!(f, "connection_refused"),
            Self::InvalidResponse => write!(f, "invalid_response"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Errors that can occur while talking to one upstream endpoint.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Request did not complete within the allowed time.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// TCP/TLS connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionRefused(String),

    /// Upstream answered with a non-success HTTP status.
    #[error("Upstream returned HTTP {status}")]
    Status { status: u16 },

    /// Upstream answered, but the body was not an acceptable response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// The failure class used for ranking diagnostics and exhaustion reports.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            Self::Status { .. } | Self::InvalidResponse(_) => FailureKind::InvalidResponse,
            Self::Other(_) => FailureKind::Other,
        }
    }

    pub(crate) fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            ms: after.as_millis() as u64,
        }
    }
}

/// One failed forwarding attempt, recorded in attempt order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub url: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl AttemptFailure {
    pub fn new(url: impl Into<String>, err: &TransportError) -> Self {
        Self {
            url: url.into(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

/// Errors that cross the core/caller boundary.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The network path segment is not a non-negative integer.
    #[error("network id must be a non-negative integer, got {value:?}")]
    MalformedNetworkId { value: String },

    /// No endpoints were configured for this network.
    #[error("unknown network {network_id}")]
    UnknownNetwork { network_id: NetworkId },

    /// Every ranked endpoint failed for this request.
    #[error("all {} endpoints for network {network_id} failed", failures.len())]
    AllEndpointsExhausted {
        network_id: NetworkId,
        failures: Vec<AttemptFailure>,
    },
}

impl ProxyError {
    /// Returns `true` if the caller's input caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedNetworkId { .. } | Self::UnknownNetwork { .. }
        )
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
