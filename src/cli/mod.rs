pub mod app;
pub mod commands;
pub mod context;
pub mod detect;
pub mod dispatch;
pub mod env;
pub mod eval;
pub mod inject;
pub mod journal;
pub mod keys;
pub mod output;
pub mod proxy;
pub mod runtime;
pub mod targets;

pub use detect::cmd_detect;
pub use eval::{cmd_eval, EvalArgs};
pub use inject::{cmd_clear_config, cmd_inject_config, ClearConfigArgs, InjectConfigArgs};
pub use journal::{cmd_journal, JournalArgs};
pub use keys::{cmd_keys, KeysArgs};
pub use proxy::{cmd_proxy, ProxyArgs};
pub use targets::{cmd_targets, TargetsArgs};
