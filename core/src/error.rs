//! Error types returned by index operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Caller supplied a malformed parameter (non-positive `top_k`, empty locator, unknown id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing path could not be read or written. In-memory state is untouched.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The on-disk index exists but failed integrity checks.
    #[error("corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    /// A bounded persistence operation did not finish before its deadline. Safe to retry.
    #[error("{operation} of {} timed out after {timeout:?}", path.display())]
    Timeout {
        operation: &'static str,
        path: PathBuf,
        timeout: Duration,
    },

    /// A document exceeded a configured resource limit and was not indexed.
    #[error("resource limit exceeded: {0}")]
    LimitExceeded(String),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io { path: path.into(), source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::CorruptIndex { path: path.into(), reason: reason.into() }
    }

    /// True for failures that leave nothing to fix on the caller's side and can simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Timeout { .. })
    }
}
