use std::time::Duration;

use anyhow::Result;
use cdp_adapter::EvalOptions;
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use super::context::{CliContext, TargetSelector};
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct EvalArgs {
    #[command(flatten)]
    pub selector: TargetSelector,

    /// Expression to evaluate
    pub expression: String,

    /// Await the result if it is a promise
    #[arg(long = "await")]
    pub await_promise: bool,

    /// Per-call timeout in milliseconds (defaults to the configured call timeout)
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvalView {
    target_id: String,
    value: Value,
}

pub async fn cmd_eval(args: EvalArgs, ctx: &CliContext) -> Result<()> {
    let attached = ctx.attach(&args.selector).await?;
    let mut options = if args.await_promise {
        EvalOptions::awaiting()
    } else {
        EvalOptions::default()
    };
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }

    let result = attached.channel.evaluate(&args.expression, options).await;
    attached.channel.close().await;

    let view = EvalView {
        target_id: attached.target.id,
        value: result?,
    };
    emit(ctx.output(), &view, |view| match &view.value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}
