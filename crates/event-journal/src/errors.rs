use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io failed: {0}")]
    Io(#[from] io::Error),
    #[error("journal entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("journal is closed")]
    Closed,
}
