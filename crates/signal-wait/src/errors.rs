use cdp_adapter::AdapterError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaitError {
    /// Nothing carrying the marker arrived within the outer bound.
    #[error("no signal {marker} within {bound_ms} ms")]
    SignalTimeout { marker: String, bound_ms: u64 },

    /// The in-page listener gave up on its own timer and reported its last observation.
    #[error("condition not met before in-page timeout ({marker}): {detail}")]
    ConditionTimeout { marker: String, detail: Value },

    #[error("malformed signal payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            WaitError::SignalTimeout { .. } | WaitError::ConditionTimeout { .. }
        )
    }
}
