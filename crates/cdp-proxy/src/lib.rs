//! Long-lived CDP proxy.
//!
//! Clients connect over WebSocket and send `{id?, targetId, method, params}`; the daemon
//! forwards each request over a pooled per-target connection and answers `{id?, result}` or
//! `{id?, error: {message}}`. Independently, a discovery tick every `discovery_interval_ms`
//! attaches passively to every target so console and exception traffic lands in the journal
//! even when no client is looking at that target.

mod capture;
mod client;
pub mod config;
mod daemon;
pub mod errors;
pub mod metrics;
mod passive;
mod pool;

pub use config::ProxyConfig;
pub use daemon::{ProxyDaemon, ProxyHandle, TickReport};
pub use errors::ProxyError;
