use std::time::Duration;

use cdp_adapter::CdpChannel;
use serde::{Deserialize, Serialize};

use crate::errors::WaitError;
use crate::listeners::MutationListener;
use crate::marker::MarkerGenerator;
use crate::signal::wait_for_signal;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDetail {
    pub matched: bool,
    /// Mutation records seen before the predicate held.
    pub mutations: u64,
}

/// Waits for a DOM mutation after which `predicate` (a JavaScript expression) is truthy.
///
/// Only mutations observed after the listener attaches count; a predicate that already holds
/// still needs a mutation to be reported.
pub async fn wait_for_mutation(
    channel: &CdpChannel,
    generator: &dyn MarkerGenerator,
    predicate: &str,
    timeout: Duration,
) -> Result<MutationDetail, WaitError> {
    let listener = MutationListener {
        predicate: predicate.to_string(),
    };
    wait_for_signal(channel, generator, &listener, timeout).await
}
