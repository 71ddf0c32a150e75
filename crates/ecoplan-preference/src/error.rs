use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read preference state '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("preference state '{}' is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write preference state '{}': {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to lock preference state '{}': {source}", path.display())]
    Lock { path: PathBuf, source: io::Error },
    #[error("score for '{action_id}' is not a finite number ({value}); refusing to persist")]
    NonFinite { action_id: String, value: f64 },
}

impl PersistenceError {
    /// True when the stored state exists but cannot be trusted.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, PersistenceError::Corrupt { .. })
    }

    /// Whether retrying the write later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::Write { .. } | PersistenceError::Lock { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
