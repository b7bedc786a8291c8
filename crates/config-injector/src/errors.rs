use std::path::PathBuf;

use cdp_adapter::AdapterError;
use thiserror::Error;

use crate::model::ConfigSnapshot;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage write failed: {0}")]
    StorageWrite(String),
    #[error("config not ready after {waited_ms} ms ({polls} polls)")]
    NotReady { waited_ms: u64, polls: u32 },
    #[error("stored config does not match: expected {expected:?}, found {actual:?}")]
    Verification {
        expected: ConfigSnapshot,
        actual: ConfigSnapshot,
    },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
