use std::sync::Arc;

use cdp_adapter::{AdapterError, AdapterErrorKind, CdpChannel, ConnectOptions, Target};
use dashmap::DashMap;
use event_journal::Journal;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::capture::CapturedChannel;
use crate::metrics;

type Slot = OnceCell<Mutex<Option<CapturedChannel>>>;

/// Client-driven upstream connections, at most one per target id.
///
/// Each target gets a slot whose mutex is held while connecting, so concurrent first requests
/// for the same target wait for a single connection attempt instead of racing their own.
pub(crate) struct ConnectionPool {
    slots: DashMap<String, Arc<Slot>>,
    options: ConnectOptions,
    journal: Journal,
}

impl ConnectionPool {
    pub fn new(options: ConnectOptions, journal: Journal) -> Self {
        Self {
            slots: DashMap::new(),
            options,
            journal,
        }
    }

    pub async fn get_or_connect(&self, target: &Target) -> Result<CdpChannel, AdapterError> {
        let slot = self
            .slots
            .entry(target.id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let cell = slot.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(existing) = guard.as_ref() {
            if existing.is_open() {
                return Ok(existing.channel.clone());
            }
        }
        if let Some(stale) = guard.take() {
            debug!(target: "cdp-proxy", target_id = %target.id, "replacing closed pooled connection");
            stale.shutdown().await;
        }

        let ws_url = target.ws_url.as_deref().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Connection).with_hint(format!(
                "target {} exposes no debugger url",
                target.id
            ))
        })?;
        let channel = CdpChannel::connect(ws_url, &self.options).await?;
        metrics::record_upstream_connect("pooled");
        info!(target: "cdp-proxy", target_id = %target.id, "pooled connection opened");

        let captured = CapturedChannel::start(channel.clone(), &target.id, "client", &self.journal);
        *guard = Some(captured);
        Ok(channel)
    }

    /// True while a connection is open or still being opened.
    pub fn has_open(&self, target_id: &str) -> bool {
        let Some(slot) = self.slots.get(target_id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let Some(cell) = slot.get() else {
            return true;
        };
        let open = match cell.try_lock() {
            Ok(guard) => guard.as_ref().map(CapturedChannel::is_open).unwrap_or(false),
            Err(_) => true,
        };
        open
    }

    pub async fn remove(&self, target_id: &str) -> bool {
        let Some((_, slot)) = self.slots.remove(target_id) else {
            return false;
        };
        let Some(cell) = slot.get() else {
            return false;
        };
        let taken = cell.lock().await.take();
        match taken {
            Some(captured) => {
                captured.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        for id in self.slot_ids() {
            self.remove(&id).await;
        }
    }

    /// Ids of every slot, open or not.
    pub fn slot_ids(&self) -> Vec<String> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn open_targets(&self) -> Vec<String> {
        let keys: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        let mut ids: Vec<String> = keys.into_iter().filter(|id| self.has_open(id)).collect();
        ids.sort();
        ids
    }
}
