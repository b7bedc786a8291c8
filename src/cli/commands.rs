use clap::Subcommand;

use super::{
    ClearConfigArgs, EvalArgs, InjectConfigArgs, JournalArgs, KeysArgs, ProxyArgs, TargetsArgs,
};

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Check the debugging endpoint and list its targets
    Targets(TargetsArgs),

    /// Locate the extension's background worker, waking it if it is asleep
    Detect,

    /// Evaluate a JavaScript expression in a target
    Eval(EvalArgs),

    /// Send key presses to a page, optionally waiting for the resulting scroll
    Keys(KeysArgs),

    /// Run the CDP proxy daemon
    Proxy(ProxyArgs),

    /// Validate, store and verify a config script in extension storage
    #[command(name = "inject-config")]
    InjectConfig(InjectConfigArgs),

    /// Reset the stored config to empty values
    #[command(name = "clear-config")]
    ClearConfig(ClearConfigArgs),

    /// Read and filter a proxy journal
    Journal(JournalArgs),
}
