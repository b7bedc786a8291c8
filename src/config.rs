//! Harness configuration file.
//!
//! Every section is optional; missing keys fall back to their defaults, and the browser endpoint
//! defaults still honour the `CDP_HARNESS_*` environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use cdp_adapter::CdpConfig;
use cdp_proxy::ProxyConfig;
use config_injector::{ReadinessProbe, StorageKeys};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub cdp: CdpConfig,
    pub proxy: ProxySettings,
    pub injector: InjectorSettings,
    pub waits: WaitSettings,
}

impl HarnessConfig {
    /// Proxy settings layered over the browser endpoint and timeouts from `cdp`.
    pub fn proxy_config(&self) -> ProxyConfig {
        let settings = &self.proxy;
        ProxyConfig {
            bind_host: settings.bind_host.clone(),
            port: settings.port,
            log_file: settings.log_file.clone(),
            discovery_interval_ms: settings.discovery_interval_ms,
            passive_attach: settings.passive_attach,
            ..ProxyConfig::from_cdp(&self.cdp)
        }
    }
}

/// Client-facing side of the proxy daemon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub bind_host: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub discovery_interval_ms: u64,
    pub passive_attach: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        let defaults = ProxyConfig::default();
        Self {
            bind_host: defaults.bind_host,
            port: defaults.port,
            log_file: defaults.log_file,
            discovery_interval_ms: defaults.discovery_interval_ms,
            passive_attach: defaults.passive_attach,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorSettings {
    pub keys: StorageKeys,
    pub ready_timeout_ms: u64,
    pub readiness: ReadinessProbe,
}

impl Default for InjectorSettings {
    fn default() -> Self {
        Self {
            keys: StorageKeys::default(),
            ready_timeout_ms: 5_000,
            readiness: ReadinessProbe::default(),
        }
    }
}

impl InjectorSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Default in-page timeout for signal waits.
    pub timeout_ms: u64,
    /// How long `--url` lookups keep polling discovery.
    pub url_wait_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            url_wait_ms: 5_000,
        }
    }
}
