use std::time::Duration;

use anyhow::{Context, Result};
use cdp_adapter::{bring_to_front, dispatch_key, KeyStroke};
use clap::Args;
use serde::Serialize;
use signal_wait::{send_key_and_wait_for_scroll, ScrollDirection, ScrollExpectation, ScrollOutcome};

use super::context::{CliContext, TargetSelector};
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct KeysArgs {
    #[command(flatten)]
    pub selector: TargetSelector,

    /// Keys to press in order: single characters or names such as Enter, ArrowDown, Escape
    #[arg(required = true, value_name = "KEY")]
    pub keys: Vec<String>,

    /// Wait for each key press to scroll the page in this direction
    #[arg(long, value_name = "DIRECTION")]
    pub wait_scroll: Option<ScrollDirection>,

    /// Minimum scroll distance in pixels when waiting for scroll
    #[arg(long, default_value_t = 1.0, requires = "wait_scroll")]
    pub min_delta: f64,

    /// Wait timeout in milliseconds (defaults to the configured wait timeout)
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Bring the page to the front before sending keys
    #[arg(long)]
    pub focus: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyResult {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scroll: Option<ScrollOutcome>,
}

pub async fn cmd_keys(args: KeysArgs, ctx: &CliContext) -> Result<()> {
    // Reject bad key names before touching the browser.
    for key in &args.keys {
        KeyStroke::parse(key).with_context(|| format!("invalid key {key:?}"))?;
    }

    let attached = ctx.attach(&args.selector).await?;
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| ctx.wait_timeout());
    let results = press_all(&args, &attached.channel, timeout).await;
    attached.channel.close().await;
    let results = results?;

    emit(ctx.output(), &results, |results| {
        results
            .iter()
            .map(|result| match &result.scroll {
                Some(scroll) => format!(
                    "{}: scrolled {:+.1}px ({:.1} -> {:.1})",
                    result.key, scroll.delta, scroll.baseline, scroll.final_position
                ),
                None => format!("{}: sent", result.key),
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

async fn press_all(
    args: &KeysArgs,
    channel: &cdp_adapter::CdpChannel,
    timeout: Duration,
) -> Result<Vec<KeyResult>> {
    if args.focus {
        bring_to_front(channel).await?;
    }

    let mut results = Vec::with_capacity(args.keys.len());
    for key in &args.keys {
        let scroll = match args.wait_scroll {
            Some(direction) => {
                let expectation = ScrollExpectation {
                    direction,
                    min_delta: args.min_delta,
                };
                let outcome = send_key_and_wait_for_scroll(channel, key, expectation, timeout)
                    .await
                    .with_context(|| format!("key {key:?} did not scroll {direction:?}"))?;
                Some(outcome)
            }
            None => {
                let stroke = KeyStroke::parse(key)?;
                dispatch_key(channel, &stroke, channel.default_timeout()).await?;
                None
            }
        };
        results.push(KeyResult {
            key: key.clone(),
            scroll,
        });
    }
    Ok(results)
}
