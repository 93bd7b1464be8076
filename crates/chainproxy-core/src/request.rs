//! JSON-RPC 2.0 wire types used by the latency probe.
//!
//! Forwarded traffic is never decoded; only the probe builds and inspects
//! JSON-RPC messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method used to probe an endpoint. Side-effect free on every EVM client.
pub const PROBE_METHOD: &str = "eth_chainId";

/// Outbound JSON-RPC 2.0 call.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

impl JsonRpcRequest<'static> {
    /// The chain-identity query sent by the default prober.
    pub fn chain_id_probe() -> Self {
        Self::new(1, PROBE_METHOD, &[])
    }
}

/// Error member of a reply.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream error {} ({})", self.code, self.message)
    }
}

/// A reply as the probe sees it. The `id` is not matched against the
/// request, so it is ignored along with any other unknown member.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Parse a `0x`-prefixed hex quantity such as the `eth_chainId` result.
pub fn parse_hex_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
