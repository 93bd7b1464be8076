//! chainproxy-server: the HTTP frontend and process wiring.

pub mod app;
pub mod logging;
pub mod server;

pub use app::{router, AppState};
pub use logging::init_tracing;
pub use server::ProxyServer;
