//! CDP test harness
//!
//! Library half of the `cdp-harness` binary: the configuration file model and the CLI itself,
//! plus re-exports of the harness crates for integration tests and scripts.

pub mod cli;
pub mod config;

pub use cdp_adapter;
pub use cdp_proxy;
pub use config_injector;
pub use event_journal;
pub use signal_wait;

pub use config::HarnessConfig;
