use std::marker::PhantomData;
use std::time::Duration;

use cdp_adapter::console::ConsoleMessage;
use cdp_adapter::{AdapterErrorKind, CdpChannel, EvalOptions, EventFuture, TransportEvent};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::WaitError;
use crate::listeners::{render_listener, ListenerScript};
use crate::marker::{MarkerGenerator, SignalMarker};

/// Added to the in-page timeout to get the outer observation bound.
pub const SIGNAL_MARGIN: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Ok,
    Timeout,
}

/// What a listener logs after its marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub status: SignalStatus,
    #[serde(default)]
    pub detail: Value,
}

impl SignalPayload {
    /// Parses the JSON that follows `marker` in `text`.
    pub fn parse(marker: &SignalMarker, text: &str) -> Result<Self, WaitError> {
        let end = SignalMarker::scan_all(text)
            .find(|(found, _)| found == marker)
            .map(|(_, end)| end)
            .ok_or_else(|| WaitError::Payload(format!("marker {marker} missing from '{text}'")))?;
        let json = text[end..].trim();
        serde_json::from_str(json)
            .map_err(|err| WaitError::Payload(format!("{err} in '{json}'")))
    }
}

fn signal_text(event: &TransportEvent) -> Option<String> {
    let message = ConsoleMessage::from_event(event)?;
    match message.first_arg_text() {
        Some(text) => Some(text.to_string()),
        None => Some(message.text),
    }
}

/// One-shot bridge from an injected listener back to the test: the observer for the marker is
/// registered on [`RemoteSignal::arm`], before any code that could emit it runs.
pub struct RemoteSignal<T> {
    marker: SignalMarker,
    pending: EventFuture,
    bound: Duration,
    armed_at: Instant,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> RemoteSignal<T> {
    pub fn arm(channel: &CdpChannel, generator: &dyn MarkerGenerator, bound: Duration) -> Self {
        let marker = generator.next_marker();
        let needle = marker.as_str().to_string();
        let pending = channel.observe(
            move |event| {
                signal_text(event)
                    .map(|text| text.contains(&needle))
                    .unwrap_or(false)
            },
            bound,
        );
        debug!(target: "signal-wait", %marker, bound_ms = bound.as_millis() as u64, "signal armed");
        Self {
            marker,
            pending,
            bound,
            armed_at: Instant::now(),
            _payload: PhantomData,
        }
    }

    pub fn marker(&self) -> &SignalMarker {
        &self.marker
    }

    pub async fn wait(self) -> Result<T, WaitError> {
        let marker = self.marker;
        let event = match self.pending.await {
            Ok(event) => event,
            Err(err) if err.is(AdapterErrorKind::Timeout) => {
                return Err(WaitError::SignalTimeout {
                    marker: marker.to_string(),
                    bound_ms: self.bound.as_millis() as u64,
                })
            }
            Err(err) => return Err(err.into()),
        };

        let text = signal_text(&event).unwrap_or_default();
        let payload = SignalPayload::parse(&marker, &text)?;
        debug!(
            target: "signal-wait",
            %marker,
            status = ?payload.status,
            elapsed_ms = self.armed_at.elapsed().as_millis() as u64,
            "signal received"
        );
        match payload.status {
            SignalStatus::Ok => serde_json::from_value(payload.detail)
                .map_err(|err| WaitError::Payload(err.to_string())),
            SignalStatus::Timeout => Err(WaitError::ConditionTimeout {
                marker: marker.to_string(),
                detail: payload.detail,
            }),
        }
    }
}

/// A listener that is attached in the page and whose signal is being observed.
pub struct PendingSignal<T> {
    signal: RemoteSignal<T>,
}

impl<T: DeserializeOwned> PendingSignal<T> {
    pub fn marker(&self) -> &SignalMarker {
        self.signal.marker()
    }

    pub async fn wait(self) -> Result<T, WaitError> {
        self.signal.wait().await
    }
}

/// Arms the observer, then injects `script`. When this returns the listener is live in the page,
/// so anything triggered afterwards is caught.
pub async fn arm_listener<T: DeserializeOwned>(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    script: &dyn ListenerScript,
    timeout: Duration,
) -> Result<PendingSignal<T>, WaitError> {
    let signal = RemoteSignal::arm(channel, generator, timeout + SIGNAL_MARGIN);
    let expression = render_listener(script, signal.marker(), timeout);
    channel.evaluate(&expression, EvalOptions::default()).await?;
    debug!(
        target: "signal-wait",
        listener = script.name(),
        marker = %signal.marker(),
        "listener attached"
    );
    Ok(PendingSignal { signal })
}

/// Generate a marker, observe, inject the listener, and await its report.
pub async fn wait_for_signal<T: DeserializeOwned>(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    script: &dyn ListenerScript,
    timeout: Duration,
) -> Result<T, WaitError> {
    arm_listener(channel, generator, script, timeout)
        .await?
        .wait()
        .await
}
