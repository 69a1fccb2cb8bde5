use log::debug;
use std::sync::Arc;

use crate::data_store::version::{Value, Version};
use crate::errors::{Result, ThothError};
use crate::oracle::Timestamp;
use crate::store::StoreShared;
use crate::transaction::TransactionStatus;

/// Per-key two-phase protocol: prewrite locks a key and writes a tentative version,
/// commit stamps it. Locks are keyed by the locking transaction's start timestamp.
///
/// Each operation works on one key. A multi-key write that fails between two
/// `commit_key` calls stays partially committed.
pub(crate) struct LockManager<'a> {
    shared: &'a StoreShared,
}

impl<'a> LockManager<'a> {
    pub(crate) fn new(shared: &'a StoreShared) -> Self {
        Self { shared }
    }

    /// Phase 1: lock `key` and write a tentative version.
    ///
    /// Only a lock held by another start timestamp rejects the prewrite; versions
    /// already committed on the key do not.
    pub(crate) fn prewrite(&self, key: &str, value: Value, start_ts: Timestamp) -> Result<()> {
        self.shared.oracle.observe(start_ts)?;
        self.shared.versions.with_chain_mut(key, |chain| {
            if let Some(holder) = chain
                .locked()
                .and_then(Version::lock_holder)
                .filter(|&holder| holder != start_ts)
            {
                debug!(
                    "Prewrite of '{}' at {} rejected: locked by {}",
                    key, start_ts, holder
                );
                return Err(ThothError::LockConflict {
                    key: key.to_string(),
                    holder,
                });
            }
            chain.lock(Version::locked(value, start_ts));
            debug!("Locked '{}' for {}", key, start_ts);
            Ok(())
        })
    }

    /// Phase 2: commit the version locked by `start_ts`.
    pub(crate) fn commit_key(&self, key: &str, start_ts: Timestamp) -> Result<Timestamp> {
        let mismatch = || ThothError::LockMismatch {
            key: key.to_string(),
            start_ts,
        };
        let chain = self.shared.versions.chain(key).ok_or_else(mismatch)?;

        let _commit_guard = self.shared.commit_lock.lock();
        let mut chain = chain.write();
        if chain.locked().and_then(Version::lock_holder) != Some(start_ts) {
            return Err(mismatch());
        }
        let commit_ts = self.shared.oracle.next();
        chain.stamp_lock(start_ts, commit_ts).ok_or_else(mismatch)?;
        self.shared.last_commit.record(key, commit_ts);
        debug!("Committed '{}' locked by {} at {}", key, start_ts, commit_ts);
        Ok(commit_ts)
    }

    /// Reads the newest version committed at or before `read_ts`.
    pub(crate) fn get(&self, key: &str, read_ts: Timestamp) -> Result<Value> {
        self.shared.oracle.observe(read_ts)?;
        let not_found = || ThothError::KeyNotFound {
            key: key.to_string(),
        };
        let chain = self.shared.versions.chain(key).ok_or_else(not_found)?;
        let chain = chain.read();
        if chain.is_empty() {
            return Err(not_found());
        }
        // A lock taken before `read_ts` may still commit below it.
        if let Some(holder) = chain
            .locked()
            .and_then(Version::lock_holder)
            .filter(|&holder| holder != read_ts && holder <= read_ts)
        {
            return Err(ThothError::Locked {
                key: key.to_string(),
                holder,
            });
        }
        chain
            .iter()
            .rev()
            .find(|v| {
                v.commit_timestamp().is_some_and(|ts| ts <= read_ts)
                    && v.lock_holder().is_none_or(|holder| holder == read_ts)
            })
            .map(|v| Arc::clone(v.value()))
            .ok_or_else(|| ThothError::NoVisibleVersion {
                key: key.to_string(),
                read_ts,
            })
    }

    /// Releases the lock held by `start_ts` and discards its tentative version.
    pub(crate) fn rollback_key(&self, key: &str, start_ts: Timestamp) -> Result<()> {
        let released = self
            .shared
            .versions
            .chain(key)
            .and_then(|chain| chain.write().unlock(start_ts));
        match released {
            Some(_) => {
                debug!("Released lock on '{}' held by {}", key, start_ts);
                Ok(())
            }
            None => Err(ThothError::LockMismatch {
                key: key.to_string(),
                start_ts,
            }),
        }
    }
}

/// A transaction driven through the prewrite/commit protocol.
///
/// Every write locks its key immediately, so conflicting writers are turned away at
/// prewrite instead of at commit. Commit stamps the keys one by one in prewrite order.
/// Dropping a handle that has not finished rolls back every lock it holds.
///
/// ```
/// use thoth::prelude::*;
///
/// let store = Store::open();
/// let mut txn = store.begin_pessimistic();
/// txn.prewrite("a", "1").unwrap();
/// txn.prewrite("b", "2").unwrap();
///
/// let mut rival = store.begin_pessimistic();
/// assert!(matches!(rival.prewrite("a", "x"), Err(ThothError::LockConflict { .. })));
///
/// let commit_ts = txn.commit().unwrap();
/// assert_eq!(store.get("a", commit_ts).unwrap().as_slice(), b"1");
/// ```
pub struct PessimisticTransaction {
    shared: Arc<StoreShared>,
    start_ts: Timestamp,
    /// Locked keys with their tentative values, in prewrite order.
    prewrites: Vec<(String, Value)>,
    status: TransactionStatus,
    commit_ts: Option<Timestamp>,
}

impl PessimisticTransaction {
    pub(crate) fn new(shared: Arc<StoreShared>, start_ts: Timestamp) -> Self {
        debug!("Began pessimistic transaction at {}", start_ts);
        Self {
            shared,
            start_ts,
            prewrites: Vec::new(),
            status: TransactionStatus::Active,
            commit_ts: None,
        }
    }

    /// The start timestamp, which is also the lock token.
    pub fn start_timestamp(&self) -> Timestamp {
        self.start_ts
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    /// Keys currently locked by this transaction.
    pub fn locked_keys(&self) -> impl Iterator<Item = &str> {
        self.prewrites.iter().map(|(key, _)| key.as_str())
    }

    /// Locks `key` and writes a tentative `value`.
    ///
    /// A rejected prewrite leaves the transaction active; the caller decides whether
    /// to abort.
    pub fn prewrite(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.ensure_active()?;
        let key = key.into();
        let value: Value = Arc::new(value.into());
        LockManager::new(&self.shared).prewrite(&key, Arc::clone(&value), self.start_ts)?;
        match self.prewrites.iter_mut().find(|(held, _)| *held == key) {
            Some((_, pending)) => *pending = value,
            None => self.prewrites.push((key, value)),
        }
        Ok(())
    }

    /// Reads `key`: an own prewrite first, otherwise the newest version committed at or
    /// before the start timestamp.
    ///
    /// # Errors
    ///
    /// [`ThothError::Locked`] if an older transaction holds the key's lock.
    pub fn read(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_active()?;
        if let Some((_, value)) = self.prewrites.iter().find(|(held, _)| held == key) {
            return Ok(Some(Arc::clone(value)));
        }
        match LockManager::new(&self.shared).get(key, self.start_ts) {
            Ok(value) => Ok(Some(value)),
            Err(ThothError::KeyNotFound { .. } | ThothError::NoVisibleVersion { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Commits every prewritten key in prewrite order and returns the last commit
    /// timestamp. A transaction without writes commits at its start timestamp.
    ///
    /// If a key fails to commit, the keys not yet committed are rolled back and the
    /// transaction ends `Aborted`; keys committed before the failure stay committed.
    pub fn commit(&mut self) -> Result<Timestamp> {
        if let (TransactionStatus::Committed, Some(commit_ts)) = (self.status, self.commit_ts) {
            return Ok(commit_ts);
        }
        self.ensure_active()?;
        self.status = TransactionStatus::Preparing;

        let mut commit_ts = self.start_ts;
        let prewrites = std::mem::take(&mut self.prewrites);
        let mut pending = prewrites.into_iter();
        while let Some((key, value)) = pending.next() {
            match LockManager::new(&self.shared).commit_key(&key, self.start_ts) {
                Ok(ts) => commit_ts = ts,
                Err(err) => {
                    debug!(
                        "Pessimistic transaction {} failed to commit '{}': {}",
                        self.start_ts, key, err
                    );
                    self.prewrites = std::iter::once((key, value)).chain(pending).collect();
                    self.rollback();
                    return Err(err);
                }
            }
        }

        self.status = TransactionStatus::Committed;
        self.commit_ts = Some(commit_ts);
        Ok(commit_ts)
    }

    /// Rolls back every held lock. Terminal transactions keep their status.
    pub fn abort(&mut self) -> TransactionStatus {
        if !self.status.is_terminal() {
            self.rollback();
        }
        self.status
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status == TransactionStatus::Active {
            Ok(())
        } else {
            Err(ThothError::TransactionNotActive {
                id: self.start_ts,
                status: self.status,
            })
        }
    }

    fn rollback(&mut self) {
        let manager = LockManager::new(&self.shared);
        for (key, _) in self.prewrites.drain(..) {
            match manager.rollback_key(&key, self.start_ts) {
                Ok(()) => {}
                // Already released through `Store::rollback_key`.
                Err(ThothError::LockMismatch { .. }) => {
                    debug!("Lock on '{}' held by {} was already released", key, self.start_ts);
                }
                Err(err) => {
                    debug!(
                        "Failed to release lock on '{}' held by {}: {}",
                        key, self.start_ts, err
                    );
                }
            }
        }
        self.status = TransactionStatus::Aborted;
        debug!("Rolled back pessimistic transaction {}", self.start_ts);
    }
}

impl Drop for PessimisticTransaction {
    fn drop(&mut self) {
        if !self.status.is_terminal() {
            self.rollback();
        }
    }
}
