//! Journaling of unsolicited upstream traffic.

use cdp_adapter::{CdpChannel, ConsoleMessage, ExceptionInfo, TransportEvent};
use event_journal::{EntryKind, Journal, JournalEntry};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;

/// An upstream connection whose events are being journaled.
pub(crate) struct CapturedChannel {
    pub channel: CdpChannel,
    capture: CancellationToken,
}

impl CapturedChannel {
    pub fn start(channel: CdpChannel, target_id: &str, mode: &'static str, journal: &Journal) -> Self {
        let capture = CancellationToken::new();
        let mut events = channel.subscribe();
        let token = capture.clone();
        let journal = journal.clone();
        let target_id = target_id.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            metrics::record_captured_event();
                            if journal.append(entry_for_event(&target_id, mode, &event)).is_err() {
                                debug!(target: "cdp-proxy", %target_id, "journal closed; capture stops");
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "cdp-proxy", %target_id, skipped, "capture lagged behind upstream events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        Self { channel, capture }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub async fn shutdown(self) {
        self.capture.cancel();
        self.channel.close().await;
    }
}

/// CONSOLE for console/log output, EXCEPTION for thrown exceptions, EVENT for the rest.
pub(crate) fn entry_for_event(target_id: &str, mode: &str, event: &TransportEvent) -> JournalEntry {
    let base = |kind| JournalEntry::new(kind).target(target_id).field("mode", mode);

    if let Some(message) = ConsoleMessage::from_event(event) {
        let mut entry = base(EntryKind::Console)
            .field("level", message.level)
            .field("text", message.text);
        if let Some(url) = message.url {
            entry = entry.field("url", url);
        }
        return entry;
    }
    if let Some(info) = ExceptionInfo::from_event(event) {
        return base(EntryKind::Exception)
            .field("message", info.message)
            .field("url", json!(info.url))
            .field("line", json!(info.line))
            .field("column", json!(info.column));
    }
    base(EntryKind::Event)
        .field("method", event.method.as_str())
        .field("params", event.params.clone())
}
