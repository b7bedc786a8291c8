use anyhow::Result;

use super::commands::Commands;
use super::context::CliContext;
use super::env::CliArgs;
use super::{
    cmd_clear_config, cmd_detect, cmd_eval, cmd_inject_config, cmd_journal, cmd_keys, cmd_proxy,
    cmd_targets,
};

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Targets(args) => cmd_targets(args, ctx).await,
        Commands::Detect => cmd_detect(ctx).await,
        Commands::Eval(args) => cmd_eval(args, ctx).await,
        Commands::Keys(args) => cmd_keys(args, ctx).await,
        Commands::Proxy(args) => cmd_proxy(args, ctx).await,
        Commands::InjectConfig(args) => cmd_inject_config(args, ctx).await,
        Commands::ClearConfig(args) => cmd_clear_config(args, ctx).await,
        Commands::Journal(args) => cmd_journal(args, ctx),
    }
}
