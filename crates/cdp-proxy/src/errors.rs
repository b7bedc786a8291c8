use cdp_adapter::AdapterError;
use event_journal::JournalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind proxy listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("upstream failure: {0}")]
    Upstream(#[from] AdapterError),
    #[error("unknown target {0}")]
    UnknownTarget(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("proxy is shutting down")]
    ShuttingDown,
}
