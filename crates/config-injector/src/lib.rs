//! Headless config injection for an extension under test.
//!
//! [`ConfigInjector::inject`] reads a local script, syntax-checks it with
//! `Runtime.compileScript`, stores it together with its path and advanced flag in
//! `chrome.storage.local` in one write, polls a readiness probe, and finally re-reads storage to
//! compare content hash, path and flag. The outcome is an [`InjectReport`] rather than an error so
//! a caller can print or assert on every phase that ran.
//!
//! # Limitation
//!
//! Console output from code running in the extension's isolated world does not reach the
//! `Runtime.consoleAPICalled` stream of the channel used here. Confirmation therefore comes from
//! reading storage back, never from log lines the injected config might print.

mod bridge;
pub mod errors;
pub mod injector;
pub mod model;

pub use bridge::render_call as render_storage_call;
pub use errors::InjectError;
pub use injector::{ConfigInjector, READY_POLL_INTERVAL};
pub use model::{
    content_hash, ConfigSnapshot, InjectFailure, InjectPhase, InjectReport, InjectRequest,
    ReadinessProbe, ReadyReport, StorageKeys, StoreReport, ValidateReport, VerifyReport,
};
