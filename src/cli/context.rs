use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cdp_adapter::discovery::target_not_found;
use cdp_adapter::{
    find_by_role, find_by_url_substring, CdpChannel, HttpDiscovery, Target, TargetRole,
    TargetSource, WakeCoordinator,
};
use clap::Args;
use tracing::info;

use super::output::OutputFormat;
use crate::config::HarnessConfig;

/// How a command picks the page or worker it talks to.
#[derive(Args, Clone, Debug, Default)]
pub struct TargetSelector {
    /// Exact target id as listed by `targets`
    #[arg(long, value_name = "ID", conflicts_with_all = ["role", "url"])]
    pub target: Option<String>,

    /// Extension role: background, frontend or options
    #[arg(long, value_name = "ROLE", conflicts_with = "url")]
    pub role: Option<TargetRole>,

    /// Substring of the target URL; polls until a match appears
    #[arg(long, value_name = "SUBSTRING")]
    pub url: Option<String>,
}

/// A connected target.
pub struct Attached {
    pub target: Target,
    pub channel: CdpChannel,
}

pub struct CliContext {
    config: Arc<HarnessConfig>,
    config_path: Option<PathBuf>,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: HarnessConfig, config_path: Option<PathBuf>, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.config.waits.timeout_ms)
    }

    pub fn discovery(&self) -> Result<HttpDiscovery> {
        Ok(HttpDiscovery::new(&self.config.cdp)?)
    }

    /// Resolves `selector` and opens a channel to the chosen target.
    ///
    /// `--role background` goes through the wake coordinator, so a dormant worker is woken
    /// rather than reported missing.
    pub async fn attach(&self, selector: &TargetSelector) -> Result<Attached> {
        let discovery = self.discovery()?;
        let target = match (&selector.target, selector.role, &selector.url) {
            (Some(id), _, _) => {
                let targets = discovery.list_targets().await?;
                targets
                    .iter()
                    .find(|target| &target.id == id)
                    .cloned()
                    .ok_or_else(|| target_not_found(&format!("id {id}"), &targets))?
            }
            (None, Some(TargetRole::Background), _) => {
                let detected = WakeCoordinator::new(
                    Arc::new(discovery),
                    self.config.cdp.extension.clone(),
                    self.config.cdp.connect_options(),
                )
                .detect_extension()
                .await?;
                return Ok(Attached {
                    target: detected.target,
                    channel: detected.channel,
                });
            }
            (None, Some(role), _) => {
                find_by_role(&discovery, &self.config.cdp.extension, role)
                    .await?
                    .target
            }
            (None, None, Some(pattern)) => {
                let wait = Duration::from_millis(self.config.waits.url_wait_ms);
                find_by_url_substring(&discovery, pattern, wait).await?
            }
            (None, None, None) => bail!("choose a target with --target, --role or --url"),
        };
        self.connect(target).await
    }

    pub async fn connect(&self, target: Target) -> Result<Attached> {
        let ws_url = target.ws_url.clone().with_context(|| {
            format!(
                "target {} exposes no debugger url (another client attached?)",
                target.id
            )
        })?;
        let channel = CdpChannel::connect(&ws_url, &self.config.cdp.connect_options()).await?;
        info!(target_id = %target.id, url = %target.url, "attached to target");
        Ok(Attached { target, channel })
    }
}
