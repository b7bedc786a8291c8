use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use cdp_adapter::TargetRole;
use clap::Args;
use config_injector::{ConfigInjector, InjectReport, InjectRequest, ReadinessProbe};

use super::context::{CliContext, TargetSelector};
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct InjectConfigArgs {
    /// Target holding extension storage (defaults to the background worker)
    #[command(flatten)]
    pub selector: TargetSelector,

    /// Config script to inject
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Path recorded alongside the content (defaults to the canonical path of FILE)
    #[arg(long, value_name = "PATH")]
    pub storage_path: Option<String>,

    /// Set the advanced flag
    #[arg(long)]
    pub advanced: bool,

    /// How long to wait for the extension to pick the config up
    #[arg(long, value_name = "MS")]
    pub ready_timeout_ms: Option<u64>,

    /// JavaScript expression that turns truthy once the config is live
    #[arg(long, value_name = "EXPR")]
    pub ready_expression: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct ClearConfigArgs {
    /// Target holding extension storage (defaults to the background worker)
    #[command(flatten)]
    pub selector: TargetSelector,
}

pub async fn cmd_inject_config(args: InjectConfigArgs, ctx: &CliContext) -> Result<()> {
    let settings = &ctx.config().injector;
    let storage_path = match &args.storage_path {
        Some(path) => path.clone(),
        None => std::fs::canonicalize(&args.file)
            .unwrap_or_else(|_| args.file.clone())
            .display()
            .to_string(),
    };
    let readiness = match &args.ready_expression {
        Some(expression) => ReadinessProbe::Expression(expression.clone()),
        None => settings.readiness.clone(),
    };
    let ready_timeout = args
        .ready_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.ready_timeout());
    let request = InjectRequest::new(args.file.clone(), storage_path)
        .advanced(args.advanced)
        .ready_timeout(ready_timeout)
        .readiness(readiness);

    let attached = ctx.attach(&storage_owner(&args.selector)).await?;
    let report = ConfigInjector::new(attached.channel.clone())
        .with_keys(settings.keys.clone())
        .inject(&request)
        .await;
    attached.channel.close().await;

    emit(ctx.output(), &report, render_report)?;
    match &report.error {
        Some(failure) => bail!(
            "config injection failed during {}: {}",
            failure.phase,
            failure.message
        ),
        None => Ok(()),
    }
}

pub async fn cmd_clear_config(args: ClearConfigArgs, ctx: &CliContext) -> Result<()> {
    let attached = ctx.attach(&storage_owner(&args.selector)).await?;
    let injector = ConfigInjector::new(attached.channel.clone())
        .with_keys(ctx.config().injector.keys.clone());
    let outcome = match injector.clear().await {
        Ok(()) => injector.read_snapshot().await,
        Err(err) => Err(err),
    };
    attached.channel.close().await;

    let snapshot = outcome?;
    emit(ctx.output(), &snapshot, |snapshot| {
        format!(
            "config cleared (path {:?}, advanced {})",
            snapshot.storage_path, snapshot.advanced
        )
    })
}

fn storage_owner(selector: &TargetSelector) -> TargetSelector {
    if selector.target.is_none() && selector.role.is_none() && selector.url.is_none() {
        TargetSelector {
            role: Some(TargetRole::Background),
            ..TargetSelector::default()
        }
    } else {
        selector.clone()
    }
}

fn render_report(report: &InjectReport) -> String {
    let mut out = format!(
        "{} {} ({} bytes, syntax {})\n",
        if report.success { "OK" } else { "FAILED" },
        report.source.display(),
        report.validate.bytes,
        if report.validate.syntax_valid {
            "valid"
        } else {
            "not checked or invalid"
        }
    );
    if let Some(store) = &report.store {
        out.push_str(&format!(
            "  stored sha256 {} at {:?} (advanced {})\n",
            store.hash, store.storage_path, store.advanced
        ));
    }
    if let Some(ready) = &report.ready {
        out.push_str(&format!(
            "  ready {} after {} poll(s), {} ms\n",
            ready.ready, ready.polls, ready.elapsed_ms
        ));
    }
    if let Some(verify) = &report.verify {
        out.push_str(&format!(
            "  verify hash {} path {} advanced {}\n",
            verify.hash_matches, verify.path_matches, verify.advanced_matches
        ));
    }
    if let Some(failure) = &report.error {
        out.push_str(&format!("  error in {}: {}\n", failure.phase, failure.message));
    }
    out
}
