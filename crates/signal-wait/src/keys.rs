use std::time::Duration;

use cdp_adapter::{dispatch_key, CdpChannel, KeyStroke};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::WaitError;
use crate::listeners::KeyupListener;
use crate::marker::{MarkerGenerator, RandomMarkers};
use crate::scroll::{capture_scroll_position, prepare_scroll_wait, ScrollExpectation, ScrollOutcome};
use crate::signal::wait_for_signal;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyupDetail {
    pub key: String,
    pub code: String,
}

/// Waits for the next `keyup` in the page, or the next one matching `filter` by key or code.
pub async fn wait_for_keyup(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    filter: Option<&str>,
    timeout: Duration,
) -> Result<KeyupDetail, WaitError> {
    let listener = KeyupListener {
        filter: filter.map(str::to_string),
    };
    wait_for_signal(channel, generator, &listener, timeout).await
}

/// Presses `key` and waits for the page to scroll as expected.
///
/// The baseline is read and the scroll listener attached before the key is dispatched.
pub async fn send_key_and_wait_for_scroll(
    channel: &CdpChannel,
    key: &str,
    expectation: ScrollExpectation,
    timeout: Duration,
) -> Result<ScrollOutcome, WaitError> {
    send_key_and_wait_for_scroll_with(channel, &RandomMarkers, key, expectation, timeout).await
}

pub async fn send_key_and_wait_for_scroll_with(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    key: &str,
    expectation: ScrollExpectation,
    timeout: Duration,
) -> Result<ScrollOutcome, WaitError> {
    let stroke = KeyStroke::parse(key)?;
    let baseline = capture_scroll_position(channel)
        .await?
        .along(expectation.direction);
    let pending =
        prepare_scroll_wait(channel, generator, expectation, Some(baseline), timeout).await?;

    debug!(target: "signal-wait", key, baseline, marker = %pending.marker(), "dispatching key");
    dispatch_key(channel, &stroke, channel.default_timeout()).await?;
    pending.wait().await
}
