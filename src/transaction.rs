use ahash::AHashMap as HashMap;
use log::debug;
use std::sync::Arc;

use crate::data_store::version::{Value, Version};
use crate::dependency_tracking::RwConflicts;
use crate::errors::{Result, ThothError};
use crate::isolation::{IsolationLevel, IsolationPolicy, ReadSet, ValidationContext, WriteBuffer};
use crate::oracle::Timestamp;
use crate::store::StoreShared;

/// Store-wide unique transaction identifier, assigned at begin.
pub type TransactionId = u64;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Reads and writes are accepted.
    Active,
    /// Commit validation is running.
    Preparing,
    Committed,
    Aborted,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

/// Represents a single optimistic transaction.
///
/// A transaction reads through the visibility rule of its isolation level, buffers its
/// writes (publishing each as an uncommitted intent), and is validated at commit.
/// Transactions are created by [`crate::Store::begin`]. Dropping a transaction that has
/// not reached a terminal state aborts it.
pub struct Transaction {
    /// Unique identifier for the transaction.
    id: TransactionId,
    /// Snapshot boundary, fixed at begin.
    start_ts: Timestamp,
    isolation_level: IsolationLevel,
    policy: &'static dyn IsolationPolicy,
    shared: Arc<StoreShared>,
    /// First observed version of every key read.
    read_set: ReadSet,
    /// Pending values of every key written.
    write_set: WriteBuffer,
    status: TransactionStatus,
    commit_ts: Option<Timestamp>,
}

impl Transaction {
    /// Starts a transaction on `shared`.
    ///
    /// The start timestamp is drawn under the commit lock so that no snapshot begins
    /// between the issuance of a commit timestamp and the stamping of its versions.
    pub(crate) fn begin(shared: Arc<StoreShared>, isolation_level: IsolationLevel) -> Self {
        let policy = shared.policy(isolation_level);
        let (id, start_ts) = {
            let _commit_guard = shared.commit_lock.lock();
            let start_ts = shared.oracle.next();
            let id = shared.next_transaction_id();
            shared.register_active(id, start_ts);
            (id, start_ts)
        };
        if policy.tracks_dependencies() {
            shared.tracker.register_txn(id, start_ts);
        }
        debug!(
            "Began Tx {} at {} ({:?})",
            id, start_ts, isolation_level
        );
        Self {
            id,
            start_ts,
            isolation_level,
            policy,
            shared,
            read_set: HashMap::new(),
            write_set: HashMap::new(),
            status: TransactionStatus::Active,
            commit_ts: None,
        }
    }

    /// Returns the unique identifier of the transaction.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.start_ts
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// The commit timestamp, once committed.
    pub fn commit_timestamp(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    pub fn read_set_len(&self) -> usize {
        self.read_set.len()
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.len()
    }

    /// Incoming/outgoing rw-antidependency flags. Always empty below serializable.
    pub fn rw_conflicts(&self) -> RwConflicts {
        if self.policy.tracks_dependencies() {
            self.shared.tracker.conflicts(self.id)
        } else {
            RwConflicts::default()
        }
    }

    /// Reads the value of a key.
    ///
    /// A key written earlier by this transaction returns the buffered value. Under
    /// snapshot and serializable isolation a key read before returns the value observed
    /// the first time. Otherwise the isolation level's visibility rule selects the
    /// version; the first version observed for a key is recorded in the read set.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` if a version of the key is visible.
    /// - `Ok(None)` if no version is visible.
    ///
    /// # Errors
    ///
    /// - [`ThothError::TransactionNotActive`] if the transaction already finished.
    /// - [`ThothError::DangerousStructure`] if the read made this serializable
    ///   transaction the pivot of a dangerous structure. The transaction is aborted.
    ///
    /// # Examples
    ///
    /// ```
    /// use thoth::prelude::*;
    ///
    /// let store = Store::open();
    /// let mut writer = store.begin(IsolationLevel::Snapshot);
    /// writer.write("greeting", "hello").unwrap();
    /// writer.commit().unwrap();
    ///
    /// let mut reader = store.begin(IsolationLevel::Snapshot);
    /// let value = reader.read("greeting").unwrap();
    /// assert_eq!(value.as_deref().map(Vec::as_slice), Some(&b"hello"[..]));
    /// assert_eq!(reader.read("missing").unwrap(), None);
    /// ```
    pub fn read(&mut self, key: &str) -> Result<Option<Value>> {
        self.ensure_active()?;

        // Read-your-own-writes
        if let Some(value) = self.write_set.get(key) {
            return Ok(Some(Arc::clone(value)));
        }
        if self.policy.pins_reads() {
            if let Some(pinned) = self.read_set.get(key) {
                return Ok(Some(Arc::clone(pinned.value())));
            }
        }

        let visible = self
            .shared
            .versions
            .visible_version(key, self.start_ts, self.policy);

        if self.policy.tracks_dependencies() {
            let flags = self.shared.tracker.record_read(self.id, key);
            if flags.is_pivot() {
                return Err(self.abort_with(ThothError::DangerousStructure { id: self.id }));
            }
        }

        Ok(visible.map(|version| {
            let value = Arc::clone(version.value());
            if !self.read_set.contains_key(key) {
                debug!(
                    "Tx {} pinned '{}' (version order {})",
                    self.id,
                    key,
                    version.order_key()
                );
                self.read_set.insert(key.to_string(), version);
            }
            value
        }))
    }

    /// Stages a write of `value` under `key`.
    ///
    /// The value is buffered for commit and published right away as an uncommitted
    /// intent, which only read-uncommitted readers can observe. Writing the same key
    /// again replaces both the buffered value and the intent.
    ///
    /// # Errors
    ///
    /// - [`ThothError::TransactionNotActive`] if the transaction already finished.
    /// - [`ThothError::DangerousStructure`] if the write made this serializable
    ///   transaction the pivot of a dangerous structure. The transaction is aborted.
    pub fn write(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.ensure_active()?;
        let key = key.into();
        let value: Value = Arc::new(value.into());

        self.shared.versions.put_intent(
            &key,
            Version::intent(Arc::clone(&value), self.id, self.start_ts),
        );
        self.write_set.insert(key.clone(), value);

        if self.policy.tracks_dependencies() {
            let flags = self.shared.tracker.record_write(self.id, &key);
            if flags.is_pivot() {
                return Err(self.abort_with(ThothError::DangerousStructure { id: self.id }));
            }
        }
        Ok(())
    }

    /// Attempts to commit the transaction.
    ///
    /// Under the store's commit lock this:
    /// 1. Validates the transaction with its isolation level's rule (write-write for
    ///    read-committed and stronger, read staleness for snapshot and serializable,
    ///    dangerous structures for serializable).
    /// 2. Draws a commit timestamp from the oracle.
    /// 3. Replaces every intent with a version committed at that timestamp and
    ///    updates the last-commit index.
    ///
    /// If validation fails the transaction is aborted and the conflict is returned.
    /// Committing an already committed transaction returns its commit timestamp again.
    ///
    /// # Examples
    ///
    /// ```
    /// use thoth::prelude::*;
    ///
    /// let store = Store::open();
    /// let mut first = store.begin(IsolationLevel::Snapshot);
    /// let mut second = store.begin(IsolationLevel::Snapshot);
    /// first.write("k", "a").unwrap();
    /// second.write("k", "b").unwrap();
    ///
    /// let ts = first.commit().unwrap();
    /// assert_eq!(first.commit().unwrap(), ts);
    ///
    /// match second.commit() {
    ///     Err(ThothError::WriteWriteConflict { key, committed_at }) => {
    ///         assert_eq!(key, "k");
    ///         assert_eq!(committed_at, ts);
    ///     }
    ///     other => panic!("unexpected outcome: {:?}", other),
    /// }
    /// assert_eq!(second.status(), TransactionStatus::Aborted);
    /// ```
    pub fn commit(&mut self) -> Result<Timestamp> {
        if let (TransactionStatus::Committed, Some(commit_ts)) = (self.status, self.commit_ts) {
            return Ok(commit_ts);
        }
        self.ensure_active()?;
        self.status = TransactionStatus::Preparing;

        let shared = Arc::clone(&self.shared);
        let _commit_guard = shared.commit_lock.lock();

        let validation = self.policy.validate(&ValidationContext {
            txn_id: self.id,
            start_ts: self.start_ts,
            read_set: &self.read_set,
            write_buffer: &self.write_set,
            last_commit: &shared.last_commit,
            tracker: &shared.tracker,
        });
        if let Err(err) = validation {
            return Err(self.abort_with(err));
        }

        let commit_ts = shared.oracle.next();
        let writes = std::mem::take(&mut self.write_set);
        let written = writes.len();
        for (key, value) in writes {
            shared.versions.commit_intent(
                &key,
                Version::committed(value, self.id, self.start_ts, commit_ts),
            );
            shared.last_commit.record(&key, commit_ts);
        }

        if self.policy.tracks_dependencies() {
            shared.tracker.mark_committed(self.id, commit_ts);
        }
        shared.unregister_active(self.id);
        self.status = TransactionStatus::Committed;
        self.commit_ts = Some(commit_ts);
        debug!(
            "Committed Tx {} at {} ({} writes)",
            self.id, commit_ts, written
        );
        Ok(commit_ts)
    }

    /// Aborts the transaction, discarding its writes and intents.
    ///
    /// Returns the resulting status. A transaction that already reached a terminal
    /// state keeps it.
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
                id: self.id,
                status: self.status,
            })
        }
    }

    fn abort_with(&mut self, err: ThothError) -> ThothError {
        debug!("Aborting Tx {}: {}", self.id, err);
        self.rollback();
        err
    }

    fn rollback(&mut self) {
        for key in self.write_set.keys() {
            self.shared.versions.remove_intent(key, self.id);
        }
        self.write_set.clear();
        self.read_set.clear();
        if self.policy.tracks_dependencies() {
            self.shared.tracker.mark_aborted(self.id);
        }
        self.shared.unregister_active(self.id);
        self.status = TransactionStatus::Aborted;
        debug!("Rolled back Tx {}", self.id);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.status.is_terminal() {
            self.rollback();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start_ts", &self.start_ts)
            .field("isolation_level", &self.isolation_level)
            .field("status", &self.status)
            .field("commit_ts", &self.commit_ts)
            .finish()
    }
}
