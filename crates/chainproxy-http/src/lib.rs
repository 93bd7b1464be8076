//! chainproxy-http: `reqwest` implementation of
//! [`UpstreamTransport`](chainproxy_core::UpstreamTransport).

pub mod client;

pub use client::{HttpTransport, HttpTransportConfig};
