use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::entry::{EntryKind, JournalEntry};
use crate::errors::JournalError;

/// Reads every well-formed line; a missing file is an empty journal and malformed lines
/// (e.g. a torn final write) are skipped.
pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, JournalError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

#[derive(Clone, Debug, Default)]
pub struct JournalFilter {
    pub kinds: Vec<EntryKind>,
    pub target_id: Option<String>,
}

impl JournalFilter {
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&entry.kind) {
            return false;
        }
        match &self.target_id {
            Some(target) => entry.target_id.as_deref() == Some(target.as_str()),
            None => true,
        }
    }

    pub fn apply(&self, entries: Vec<JournalEntry>) -> Vec<JournalEntry> {
        entries
            .into_iter()
            .filter(|entry| self.matches(entry))
            .collect()
    }
}
