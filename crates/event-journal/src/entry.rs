use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Console,
    Exception,
    Event,
    Request,
    Response,
    Proxy,
    Error,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Console => "CONSOLE",
            EntryKind::Exception => "EXCEPTION",
            EntryKind::Event => "EVENT",
            EntryKind::Request => "REQUEST",
            EntryKind::Response => "RESPONSE",
            EntryKind::Proxy => "PROXY",
            EntryKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "CONSOLE" => Ok(EntryKind::Console),
            "EXCEPTION" => Ok(EntryKind::Exception),
            "EVENT" => Ok(EntryKind::Event),
            "REQUEST" => Ok(EntryKind::Request),
            "RESPONSE" => Ok(EntryKind::Response),
            "PROXY" => Ok(EntryKind::Proxy),
            "ERROR" => Ok(EntryKind::Error),
            other => Err(format!("unknown journal entry type {other:?}")),
        }
    }
}

/// One journal line: `{timestamp, type, targetId?, ...fields}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl JournalEntry {
    pub fn new(kind: EntryKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            target_id: None,
            fields: Map::new(),
        }
    }

    pub fn target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
