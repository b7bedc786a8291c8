use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use event_journal::{read_entries, EntryKind, JournalEntry, JournalFilter};

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct JournalArgs {
    /// Journal file (defaults to the configured proxy log file)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Keep only these entry types (repeatable): CONSOLE, EXCEPTION, EVENT, REQUEST, RESPONSE,
    /// PROXY, ERROR
    #[arg(long = "type", value_name = "TYPE")]
    pub kinds: Vec<EntryKind>,

    /// Keep only entries for this target id
    #[arg(long, value_name = "ID")]
    pub target: Option<String>,

    /// Only show the last N matching entries
    #[arg(long, value_name = "N")]
    pub tail: Option<usize>,
}

pub fn cmd_journal(args: JournalArgs, ctx: &CliContext) -> Result<()> {
    let path = args
        .file
        .clone()
        .unwrap_or_else(|| ctx.config().proxy.log_file.clone());
    if !path.exists() {
        bail!("journal {} does not exist", path.display());
    }

    let entries = read_entries(&path)
        .with_context(|| format!("Failed to read journal {}", path.display()))?;
    let filter = JournalFilter {
        kinds: args.kinds,
        target_id: args.target,
    };
    let mut entries = filter.apply(entries);
    if let Some(tail) = args.tail {
        let skip = entries.len().saturating_sub(tail);
        entries.drain(..skip);
    }

    emit(ctx.output(), &entries, |entries| {
        entries.iter().map(render_line).collect::<Vec<_>>().join("\n")
    })
}

fn render_line(entry: &JournalEntry) -> String {
    let mut line = format!(
        "{} {:<9}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        entry.kind.as_str()
    );
    if let Some(target) = &entry.target_id {
        line.push_str(&format!(" [{target}]"));
    }
    for (key, value) in &entry.fields {
        match value {
            serde_json::Value::String(text) => line.push_str(&format!(" {key}={text}")),
            other => line.push_str(&format!(" {key}={other}")),
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_line_lists_kind_target_and_fields() {
        let entry = JournalEntry::new(EntryKind::Console)
            .target("T1")
            .field("level", "log")
            .field("args", serde_json::json!(["hello"]));
        let line = render_line(&entry);
        assert!(line.contains("CONSOLE"));
        assert!(line.contains("[T1]"));
        assert!(line.contains("level=log"));
        assert!(line.contains(r#"args=["hello"]"#));
    }
}
