//! Chrome DevTools Protocol plumbing for the extension test harness.
//!
//! The crate owns the wire client (one correlated channel per target), the HTTP discovery
//! wrapper and role matching, the target registry used by the proxy daemon, and the auto-wake
//! coordinator that revives a dormant extension service worker. Everything above it (signal
//! waits, config injection, the proxy) talks to a browser exclusively through [`CdpChannel`].

pub mod console;
pub mod discovery;
pub mod input;
pub mod metrics;
pub mod registry;
pub mod target;
pub mod transport;
mod util;
pub mod wake;

#[cfg(any(test, feature = "fake-browser"))]
pub mod fake;

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("connection failed")]
        Connection,
        #[error("remote error")]
        Remote,
        #[error("timed out")]
        Timeout,
        #[error("channel closed")]
        ChannelClosed,
        #[error("protocol violation")]
        Protocol,
        #[error("target not found")]
        TargetNotFound,
        #[error("extension not detected")]
        ExtensionNotDetected,
        #[error("discovery endpoint unavailable")]
        DiscoveryUnavailable,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        /// Remote error code, set for [`AdapterErrorKind::Remote`].
        pub code: Option<i64>,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            if let Some(code) = self.code {
                write!(f, " (code {})", code)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                code: None,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_code(mut self, code: i64) -> Self {
            self.code = Some(code);
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub fn is(&self, kind: AdapterErrorKind) -> bool {
            self.kind == kind
        }

        pub fn hint(&self) -> &str {
            self.hint.as_deref().unwrap_or_default()
        }
    }
}

pub mod config {
    use serde::{Deserialize, Serialize};
    use std::env;
    use std::time::Duration;

    use crate::transport::ConnectOptions;

    /// Connection settings for the browser's remote-debugging endpoint.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub host: String,
        pub port: u16,
        pub discovery_timeout_ms: u64,
        pub call_timeout_ms: u64,
        pub connect_timeout_ms: u64,
        /// Methods issued right after a target channel opens.
        pub handshake: Vec<String>,
        pub extension: ExtensionProfile,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                host: resolve_host(),
                port: resolve_port(),
                discovery_timeout_ms: 2_000,
                call_timeout_ms: resolve_call_timeout_ms(),
                connect_timeout_ms: 5_000,
                handshake: vec!["Runtime.enable".into(), "Log.enable".into()],
                extension: ExtensionProfile::default(),
            }
        }
    }

    impl CdpConfig {
        pub fn for_endpoint(host: impl Into<String>, port: u16) -> Self {
            Self {
                host: host.into(),
                port,
                ..Self::default()
            }
        }

        /// Base URL of the HTTP discovery endpoint, e.g. `http://127.0.0.1:9222`.
        pub fn endpoint(&self) -> String {
            format!("http://{}:{}", self.host, self.port)
        }

        pub fn call_timeout(&self) -> Duration {
            Duration::from_millis(self.call_timeout_ms)
        }

        pub fn discovery_timeout(&self) -> Duration {
            Duration::from_millis(self.discovery_timeout_ms)
        }

        pub fn connect_options(&self) -> ConnectOptions {
            ConnectOptions {
                handshake: self.handshake.clone(),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                call_timeout: self.call_timeout(),
            }
        }
    }

    /// Where the extension under test keeps its well-known entry points.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ExtensionProfile {
        /// Exact target title that identifies the background context, when the browser
        /// reports one.
        pub title: Option<String>,
        pub background_script: String,
        /// Iframe injected into every page; present even while the worker sleeps.
        pub frontend_page: String,
        /// Extension page opened in a fresh tab to wake the worker up.
        pub wake_page: String,
    }

    impl Default for ExtensionProfile {
        fn default() -> Self {
            Self {
                title: None,
                background_script: "background.js".into(),
                frontend_page: "pages/frontend.html".into(),
                wake_page: "pages/options.html".into(),
            }
        }
    }

    fn resolve_host() -> String {
        match env::var("CDP_HARNESS_HOST") {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => "127.0.0.1".to_string(),
        }
    }

    fn resolve_port() -> u16 {
        env::var("CDP_HARNESS_PORT")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(9222)
    }

    fn resolve_call_timeout_ms() -> u64 {
        env::var("CDP_HARNESS_CALL_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(5_000)
    }

}

pub use config::{CdpConfig, ExtensionProfile};
pub use console::{ConsoleMessage, ExceptionInfo};
pub use discovery::{
    find_by_role, find_by_url_substring, HttpDiscovery, MatchVia, RoleMatch, TargetRole,
    TargetSource,
};
pub use error::{AdapterError, AdapterErrorKind};
pub use input::{bring_to_front, dispatch_key, KeyStroke};
pub use registry::{RegistryDiff, TargetRegistry};
pub use target::{Target, TargetKind};
pub use transport::{CdpChannel, ConnectOptions, EvalOptions, EventFuture, TransportEvent};
pub use wake::{DetectedExtension, WakeCoordinator, WakeOptions, WakeState};
