use std::sync::Arc;

use crate::oracle::Timestamp;
use crate::transaction::TransactionId;

/// Stored value. Strings are kept as their UTF-8 bytes.
pub type Value = Arc<Vec<u8>>;

/// One entry of a key's version chain.
///
/// A version starts its life either as an uncommitted *intent* (published by an
/// optimistic transaction at write time) or as a *locked* version (written by a
/// pessimistic prewrite). Once it carries a commit timestamp it never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    value: Value,
    created_by: TransactionId,
    start_timestamp: Timestamp,
    commit_timestamp: Option<Timestamp>,
    lock_holder: Option<Timestamp>,
}

impl Version {
    /// Uncommitted version written by an optimistic transaction.
    pub fn intent(value: Value, created_by: TransactionId, start_timestamp: Timestamp) -> Self {
        Self {
            value,
            created_by,
            start_timestamp,
            commit_timestamp: None,
            lock_holder: None,
        }
    }

    /// Tentative version written by a pessimistic prewrite.
    ///
    /// The pessimistic surface has no transaction id, so the start timestamp doubles as
    /// the creator.
    pub fn locked(value: Value, start_timestamp: Timestamp) -> Self {
        Self {
            value,
            created_by: start_timestamp,
            start_timestamp,
            commit_timestamp: None,
            lock_holder: Some(start_timestamp),
        }
    }

    pub fn committed(
        value: Value,
        created_by: TransactionId,
        start_timestamp: Timestamp,
        commit_timestamp: Timestamp,
    ) -> Self {
        Self {
            value,
            created_by,
            start_timestamp,
            commit_timestamp: Some(commit_timestamp),
            lock_holder: None,
        }
    }

    /// Stamps an uncommitted version, releasing its lock if it had one.
    pub(crate) fn into_committed(self, commit_timestamp: Timestamp) -> Self {
        debug_assert!(self.commit_timestamp.is_none(), "version already committed");
        Self {
            commit_timestamp: Some(commit_timestamp),
            lock_holder: None,
            ..self
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn created_by(&self) -> TransactionId {
        self.created_by
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.start_timestamp
    }

    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        self.commit_timestamp
    }

    pub fn lock_holder(&self) -> Option<Timestamp> {
        self.lock_holder
    }

    pub fn is_committed(&self) -> bool {
        self.commit_timestamp.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.lock_holder.is_some()
    }

    /// Whether this is the optimistic intent of `txn_id`.
    pub(crate) fn is_intent_of(&self, txn_id: TransactionId) -> bool {
        self.created_by == txn_id && self.commit_timestamp.is_none() && self.lock_holder.is_none()
    }

    /// Position of the version in its chain: commit timestamp if committed, start
    /// timestamp otherwise.
    pub fn order_key(&self) -> Timestamp {
        self.commit_timestamp.unwrap_or(self.start_timestamp)
    }
}
