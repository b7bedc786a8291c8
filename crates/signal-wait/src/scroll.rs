use std::time::Duration;

use cdp_adapter::{AdapterError, AdapterErrorKind, CdpChannel, EvalOptions};
use serde::{Deserialize, Serialize};

use crate::errors::WaitError;
use crate::listeners::{ScrollDirection, ScrollListener};
use crate::marker::{MarkerGenerator, SignalMarker};
use crate::signal::{arm_listener, PendingSignal};

const POSITION_JS: &str = "(() => {
  const scroller = document.scrollingElement || document.documentElement || document.body;
  return {
    x: Math.round(window.scrollX || (scroller ? scroller.scrollLeft : 0) || 0),
    y: Math.round(window.scrollY || (scroller ? scroller.scrollTop : 0) || 0),
  };
})()";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

impl ScrollPosition {
    pub fn along(&self, direction: ScrollDirection) -> f64 {
        if direction.is_vertical() {
            self.y
        } else {
            self.x
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollExpectation {
    pub direction: ScrollDirection,
    pub min_delta: f64,
}

impl ScrollExpectation {
    pub fn down(min_delta: f64) -> Self {
        Self {
            direction: ScrollDirection::Down,
            min_delta,
        }
    }

    pub fn up(min_delta: f64) -> Self {
        Self {
            direction: ScrollDirection::Up,
            min_delta,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollOutcome {
    pub baseline: f64,
    #[serde(rename = "final")]
    pub final_position: f64,
    /// `final - baseline`; negative for upward or leftward scrolls.
    pub delta: f64,
}

pub async fn capture_scroll_position(channel: &CdpChannel) -> Result<ScrollPosition, WaitError> {
    let value = channel.evaluate(POSITION_JS, EvalOptions::default()).await?;
    serde_json::from_value(value.clone()).map_err(|err| {
        WaitError::from(
            AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("unexpected scroll position {value}: {err}")),
        )
    })
}

/// Scroll listener attached in the page; trigger the scroll, then [`PendingScroll::wait`].
pub struct PendingScroll {
    inner: PendingSignal<ScrollOutcome>,
}

impl PendingScroll {
    pub fn marker(&self) -> &SignalMarker {
        self.inner.marker()
    }

    pub async fn wait(self) -> Result<ScrollOutcome, WaitError> {
        self.inner.wait().await
    }
}

/// Attaches a scroll listener and returns once it is live.
///
/// Pass a `baseline` read with [`capture_scroll_position`] before anything could move the page.
/// Without one the listener reads the offset when it attaches, which is only as good as the
/// page's idleness at that moment.
pub async fn prepare_scroll_wait(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    expectation: ScrollExpectation,
    baseline: Option<f64>,
    timeout: Duration,
) -> Result<PendingScroll, WaitError> {
    let listener = ScrollListener {
        direction: expectation.direction,
        min_delta: expectation.min_delta,
        baseline,
    };
    let inner = arm_listener(channel, generator, &listener, timeout).await?;
    Ok(PendingScroll { inner })
}

pub async fn wait_for_scroll_delta(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    expectation: ScrollExpectation,
    timeout: Duration,
) -> Result<ScrollOutcome, WaitError> {
    let baseline = capture_scroll_position(channel).await?.along(expectation.direction);
    prepare_scroll_wait(channel, generator, expectation, Some(baseline), timeout)
        .await?
        .wait()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_uses_final_on_the_wire() {
        let outcome: ScrollOutcome =
            serde_json::from_value(json!({ "baseline": 0, "final": 50, "delta": 50 })).unwrap();
        assert_eq!(
            outcome,
            ScrollOutcome {
                baseline: 0.0,
                final_position: 50.0,
                delta: 50.0
            }
        );
        assert_eq!(serde_json::to_value(outcome).unwrap()["final"], json!(50.0));
    }

    #[test]
    fn position_picks_axis_by_direction() {
        let position = ScrollPosition { x: 3.0, y: 7.0 };
        assert_eq!(position.along(ScrollDirection::Up), 7.0);
        assert_eq!(position.along(ScrollDirection::Right), 3.0);
    }
}
