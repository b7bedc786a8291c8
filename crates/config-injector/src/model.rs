use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Names of the three storage keys the config lives under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageKeys {
    pub content: String,
    pub path: String,
    pub advanced: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            content: "snippets".into(),
            path: "localPath".into(),
            advanced: "showAdvanced".into(),
        }
    }
}

/// How AWAIT_READY decides the target has picked the config up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "expression")]
pub enum ReadinessProbe {
    /// The content key reads back as a string, empty included.
    #[default]
    StoredContent,
    /// A JavaScript expression (awaited if it returns a promise) that turns truthy.
    Expression(String),
}

#[derive(Clone, Debug)]
pub struct InjectRequest {
    pub source: PathBuf,
    pub storage_path: String,
    pub advanced: bool,
    pub ready_timeout: Duration,
    pub readiness: ReadinessProbe,
}

impl InjectRequest {
    pub fn new(source: impl Into<PathBuf>, storage_path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            storage_path: storage_path.into(),
            advanced: false,
            ready_timeout: Duration::from_secs(5),
            readiness: ReadinessProbe::default(),
        }
    }

    pub fn advanced(mut self, flag: bool) -> Self {
        self.advanced = flag;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = probe;
        self
    }
}

/// What is currently registered in the target's storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// `None` when the content key is missing or holds the cleared state.
    pub content_hash: Option<String>,
    pub storage_path: String,
    pub advanced: bool,
}

impl ConfigSnapshot {
    /// Snapshot of `content` stored under `storage_path`.
    ///
    /// Empty content with an empty path is what `clear` leaves behind and has no hash; any other
    /// stored string, the empty script included, is hashed.
    pub fn stored(content: Option<&str>, storage_path: impl Into<String>, advanced: bool) -> Self {
        let storage_path = storage_path.into();
        let content_hash = content
            .filter(|content| !(content.is_empty() && storage_path.is_empty()))
            .map(|content| content_hash(content.as_bytes()));
        Self {
            content_hash,
            storage_path,
            advanced,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectPhase {
    Validate,
    Store,
    AwaitReady,
    PostVerify,
    Succeeded,
    Failed,
}

impl fmt::Display for InjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InjectPhase::Validate => "validate",
            InjectPhase::Store => "store",
            InjectPhase::AwaitReady => "await_ready",
            InjectPhase::PostVerify => "post_verify",
            InjectPhase::Succeeded => "succeeded",
            InjectPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReport {
    pub syntax_valid: bool,
    pub bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReport {
    pub hash: String,
    pub storage_path: String,
    pub advanced: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyReport {
    pub ready: bool,
    pub polls: u32,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub expected: ConfigSnapshot,
    pub actual: ConfigSnapshot,
    pub hash_matches: bool,
    pub path_matches: bool,
    pub advanced_matches: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectFailure {
    pub phase: InjectPhase,
    pub message: String,
}

/// Outcome of one injection; every phase that ran leaves its section filled in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectReport {
    pub success: bool,
    pub phase: InjectPhase,
    pub source: PathBuf,
    pub validate: ValidateReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<ReadyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InjectFailure>,
}

impl InjectReport {
    pub(crate) fn started(source: PathBuf) -> Self {
        Self {
            success: false,
            phase: InjectPhase::Validate,
            source,
            validate: ValidateReport::default(),
            store: None,
            ready: None,
            verify: None,
            error: None,
        }
    }

    pub(crate) fn fail(mut self, message: impl Into<String>) -> Self {
        self.error = Some(InjectFailure {
            phase: self.phase,
            message: message.into(),
        });
        self.phase = InjectPhase::Failed;
        self.success = false;
        self
    }

    pub(crate) fn succeed(mut self) -> Self {
        self.phase = InjectPhase::Succeeded;
        self.success = true;
        self
    }

    /// Phase that failed, if any.
    pub fn failed_phase(&self) -> Option<InjectPhase> {
        self.error.as_ref().map(|failure| failure.phase)
    }
}
