use anyhow::Result;
use cdp_adapter::discovery::{describe_targets, select_role};
use cdp_adapter::{RoleMatch, Target, TargetRole};
use clap::Args;
use serde::Serialize;
use tracing::warn;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct TargetsArgs {
    /// Only report the target that plays this extension role
    #[arg(long, value_name = "ROLE")]
    pub role: Option<TargetRole>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum TargetsView {
    All {
        endpoint: String,
        targets: Vec<Target>,
    },
    Role {
        endpoint: String,
        role: TargetRole,
        matched: Option<RoleMatch>,
    },
}

pub async fn cmd_targets(args: TargetsArgs, ctx: &CliContext) -> Result<()> {
    let discovery = ctx.discovery()?;
    let targets = discovery.preflight().await?;
    let endpoint = discovery.endpoint().to_string();

    let view = match args.role {
        None => TargetsView::All { endpoint, targets },
        Some(role) => {
            let matched = select_role(&targets, &ctx.config().cdp.extension, role);
            if matched.is_none() {
                warn!(%role, observed = %describe_targets(&targets), "role not matched");
            }
            TargetsView::Role {
                endpoint,
                role,
                matched,
            }
        }
    };

    emit(ctx.output(), &view, render_human)
}

fn render_human(view: &TargetsView) -> String {
    match view {
        TargetsView::All { endpoint, targets } => {
            let mut out = format!("{} target(s) at {}\n", targets.len(), endpoint);
            for target in targets {
                out.push_str(&format!("  {:<36} {}\n", target.id, target.describe()));
            }
            out
        }
        TargetsView::Role {
            role,
            matched: Some(found),
            ..
        } => {
            let dormant = if found.is_dormant() {
                " (worker asleep; run `detect` to wake it)"
            } else {
                ""
            };
            format!(
                "{role}: {} {}{dormant}",
                found.target.id,
                found.target.describe()
            )
        }
        TargetsView::Role {
            role,
            matched: None,
            ..
        } => format!("{role}: no matching target"),
    }
}
