use anyhow::Result;
use cdp_adapter::{WakeCoordinator, WakeState};
use serde::Serialize;

use super::context::CliContext;
use super::output::emit;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectView {
    extension_id: String,
    target_id: String,
    url: String,
    woke: bool,
    transitions: Vec<WakeState>,
}

pub async fn cmd_detect(ctx: &CliContext) -> Result<()> {
    let detected = WakeCoordinator::from_config(&ctx.config().cdp)?
        .detect_extension()
        .await?;
    detected.channel.close().await;

    let view = DetectView {
        extension_id: detected.extension_id,
        target_id: detected.target.id,
        url: detected.target.url,
        woke: detected.woke,
        transitions: detected.transitions,
    };
    emit(ctx.output(), &view, |view| {
        let path = view
            .transitions
            .iter()
            .map(|state| format!("{state:?}"))
            .collect::<Vec<_>>()
            .join(" -> ");
        format!(
            "extension {} background {} ({})\n  {}{}",
            view.extension_id,
            view.target_id,
            view.url,
            path,
            if view.woke { " (woken)" } else { "" }
        )
    })
}
