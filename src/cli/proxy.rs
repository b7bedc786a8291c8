use std::path::PathBuf;

use anyhow::{Context, Result};
use cdp_proxy::{ProxyDaemon, TickReport};
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct ProxyArgs {
    /// Client-facing port (0 picks an ephemeral port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Journal file, appended to
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Discovery interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Only forward client requests; do not attach to every target
    #[arg(long)]
    pub no_passive: bool,

    /// Run one discovery tick, report it and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OnceView {
    listen: String,
    log_file: PathBuf,
    tick: TickReport,
}

pub async fn cmd_proxy(args: ProxyArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().proxy_config();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.log_file {
        config.log_file = path;
    }
    if let Some(interval) = args.interval_ms {
        config.discovery_interval_ms = interval;
    }
    if args.no_passive {
        config.passive_attach = false;
    }

    let handle = ProxyDaemon::start(config)
        .await
        .context("Failed to start proxy")?;

    if args.once {
        let tick = handle.tick_now().await;
        let view = OnceView {
            listen: handle.ws_url(),
            log_file: handle.log_path.clone(),
            tick,
        };
        handle.shutdown().await?;
        return emit(ctx.output(), &view, |view| {
            format!(
                "proxy {} journal {}\n  listed {} appeared {} disappeared {} attached {} failed {}",
                view.listen,
                view.log_file.display(),
                view.tick.listed,
                view.tick.appeared.len(),
                view.tick.disappeared.len(),
                view.tick.attached.len(),
                view.tick.failed.len()
            )
        });
    }

    println!(
        "proxy listening on {} (journal {})",
        handle.ws_url(),
        handle.log_path.display()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down proxy");
    handle.shutdown().await?;
    Ok(())
}
