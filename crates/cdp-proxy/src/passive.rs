use cdp_adapter::{AdapterError, AdapterErrorKind, CdpChannel, ConnectOptions, Target};
use dashmap::DashMap;
use event_journal::Journal;
use tracing::info;

use crate::capture::CapturedChannel;
use crate::metrics;

/// Background connections opened by the discovery tick purely to journal target traffic.
pub(crate) struct PassiveAttachments {
    live: DashMap<String, CapturedChannel>,
    options: ConnectOptions,
    journal: Journal,
}

impl PassiveAttachments {
    pub fn new(options: ConnectOptions, journal: Journal) -> Self {
        Self {
            live: DashMap::new(),
            options,
            journal,
        }
    }

    pub fn has_live(&self, target_id: &str) -> bool {
        self.live
            .get(target_id)
            .map(|entry| entry.value().is_open())
            .unwrap_or(false)
    }

    pub async fn attach(&self, target: &Target) -> Result<(), AdapterError> {
        let ws_url = target.ws_url.as_deref().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Connection).with_hint(format!(
                "target {} exposes no debugger url",
                target.id
            ))
        })?;
        let channel = CdpChannel::connect(ws_url, &self.options).await?;
        metrics::record_upstream_connect("passive");
        info!(target: "cdp-proxy", target_id = %target.id, url = %target.url, "passive attach");

        let captured = CapturedChannel::start(channel, &target.id, "passive", &self.journal);
        let previous = self.live.insert(target.id.clone(), captured);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(())
    }

    pub async fn detach(&self, target_id: &str) -> bool {
        let removed = self.live.remove(target_id);
        match removed {
            Some((_, captured)) => {
                captured.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn detach_all(&self) {
        let ids: Vec<String> = self.live.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.detach(&id).await;
        }
    }

    pub fn target_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .live
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}
