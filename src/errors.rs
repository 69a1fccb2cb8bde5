use thiserror::Error;

use crate::oracle::Timestamp;
use crate::transaction::{TransactionId, TransactionStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThothError {
    #[error("Transaction {id} is not active (status: {status:?})")]
    TransactionNotActive {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Key '{key}' is locked by transaction started at {holder}")]
    LockConflict { key: String, holder: Timestamp },

    #[error("Lock on key '{key}' is not held by transaction started at {start_ts}")]
    LockMismatch { key: String, start_ts: Timestamp },

    #[error("Write-write conflict on key '{key}' (committed at {committed_at})")]
    WriteWriteConflict { key: String, committed_at: Timestamp },

    #[error("Stale read on key '{key}' (overwritten at {committed_at})")]
    StaleReadConflict { key: String, committed_at: Timestamp },

    #[error("Transaction {id} is the pivot of a dangerous structure")]
    DangerousStructure { id: TransactionId },

    #[error("Key '{key}' not found")]
    KeyNotFound { key: String },

    #[error("No version of key '{key}' is visible at {read_ts}")]
    NoVisibleVersion { key: String, read_ts: Timestamp },

    #[error("Key '{key}' is locked by transaction started at {holder}")]
    Locked { key: String, holder: Timestamp },

    #[error("Timestamp {ts} leaves no room for a later one (max {max})")]
    InvalidTimestamp { ts: Timestamp, max: Timestamp },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ThothError {
    /// Whether the failed transaction may succeed if the caller retries it from scratch.
    ///
    /// Conflicts are retryable; misuse of a finished transaction, missing keys,
    /// out-of-range timestamps and bad configuration are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ThothError::LockConflict { .. }
                | ThothError::WriteWriteConflict { .. }
                | ThothError::StaleReadConflict { .. }
                | ThothError::DangerousStructure { .. }
                | ThothError::Locked { .. }
        )
    }

    /// Whether this error moved the transaction that produced it to `Aborted`.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            ThothError::WriteWriteConflict { .. }
                | ThothError::StaleReadConflict { .. }
                | ThothError::DangerousStructure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ThothError>;
