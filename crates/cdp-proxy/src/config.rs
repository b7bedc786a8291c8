use std::path::PathBuf;
use std::time::Duration;

use cdp_adapter::{CdpConfig, ConnectOptions};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Interface the client listener binds to.
    pub bind_host: String,
    /// Client-facing port; 0 picks an ephemeral port.
    pub port: u16,
    /// Journal path, opened in append mode.
    pub log_file: PathBuf,
    pub cdp_host: String,
    pub cdp_port: u16,
    pub discovery_interval_ms: u64,
    pub discovery_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Attach to every discovered target to journal its console traffic.
    pub passive_attach: bool,
    /// Enable methods issued on every upstream connection.
    pub handshake: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".into(),
            port: 9223,
            log_file: PathBuf::from("cdp-proxy.jsonl"),
            cdp_host: "127.0.0.1".into(),
            cdp_port: 9222,
            discovery_interval_ms: 2_000,
            discovery_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            passive_attach: true,
            handshake: vec!["Runtime.enable".into(), "Log.enable".into()],
        }
    }
}

impl ProxyConfig {
    pub fn from_cdp(cdp: &CdpConfig) -> Self {
        Self {
            cdp_host: cdp.host.clone(),
            cdp_port: cdp.port,
            discovery_timeout_ms: cdp.discovery_timeout_ms,
            request_timeout_ms: cdp.call_timeout_ms,
            connect_timeout_ms: cdp.connect_timeout_ms,
            handshake: cdp.handshake.clone(),
            ..Self::default()
        }
    }

    pub fn upstream_endpoint(&self) -> String {
        format!("http://{}:{}", self.cdp_host, self.cdp_port)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms.max(1))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            handshake: self.handshake.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            call_timeout: self.request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_cdp_endpoint() {
        let cdp = CdpConfig::for_endpoint("10.1.1.1", 9333);
        let cfg = ProxyConfig::from_cdp(&cdp);
        assert_eq!(cfg.upstream_endpoint(), "http://10.1.1.1:9333");
        assert_eq!(cfg.discovery_interval(), Duration::from_millis(2_000));
        assert!(cfg.passive_attach);
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let cfg: ProxyConfig = serde_json::from_str(r#"{"port": 0, "log_file": "proxy.jsonl"}"#).unwrap();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.log_file, PathBuf::from("proxy.jsonl"));
        assert_eq!(cfg.discovery_interval_ms, 2_000);
    }
}
