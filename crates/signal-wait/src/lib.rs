//! Event-driven waits for pages driven over CDP.
//!
//! Instead of sleeping, a wait injects a native listener (scroll, DOM mutation, keyup) that
//! reports back by logging a [`SignalMarker`] followed by a JSON payload. The console observer
//! for that marker is registered before the listener is injected, and the listener carries its
//! own timeout so an abandoned wait cleans up after itself.
//!
//! ```no_run
//! # async fn demo(channel: cdp_adapter::CdpChannel) -> Result<(), signal_wait::WaitError> {
//! use std::time::Duration;
//! use signal_wait::{send_key_and_wait_for_scroll, ScrollExpectation};
//!
//! let outcome = send_key_and_wait_for_scroll(
//!     &channel,
//!     "j",
//!     ScrollExpectation::down(20.0),
//!     Duration::from_secs(2),
//! )
//! .await?;
//! assert!(outcome.delta >= 20.0);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod keys;
pub mod listeners;
pub mod marker;
pub mod mutation;
pub mod scroll;
pub mod signal;

pub use errors::WaitError;
pub use keys::{
    send_key_and_wait_for_scroll, send_key_and_wait_for_scroll_with, wait_for_keyup, KeyupDetail,
};
pub use listeners::{
    render_listener, KeyupListener, ListenerScript, MutationListener, ScrollDirection,
    ScrollListener,
};
pub use marker::{MarkerGenerator, RandomMarkers, SignalMarker};
pub use mutation::{wait_for_mutation, MutationDetail};
pub use scroll::{
    capture_scroll_position, prepare_scroll_wait, wait_for_scroll_delta, PendingScroll,
    ScrollExpectation, ScrollOutcome, ScrollPosition,
};
pub use signal::{
    arm_listener, wait_for_signal, PendingSignal, RemoteSignal, SignalPayload, SignalStatus,
    SIGNAL_MARGIN,
};
