use ahash::AHashMap as HashMap;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::StoreConfig;
use crate::data_store::last_commit::LastCommitIndex;
use crate::data_store::version::{Value, Version};
use crate::data_store::version_store::VersionStore;
use crate::dependency_tracking::DependencyTracker;
use crate::errors::Result;
use crate::isolation::{IsolationLevel, IsolationPolicy};
use crate::lock_manager::{LockManager, PessimisticTransaction};
use crate::oracle::{LocalTimestampOracle, Timestamp, TimestampOracle};
use crate::transaction::{Transaction, TransactionId};

/// Thoth Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::dependency_tracking::RwConflicts;
    pub use crate::errors::*;
    pub use crate::isolation::{IsolationLevel, IsolationPolicy};
    pub use crate::lock_manager::PessimisticTransaction;
    pub use crate::oracle::*;
    pub use crate::store::Store;
    pub use crate::transaction::*;
    pub use crate::data_store::version::{Value, Version};
}

/// State shared by a store and every transaction it hands out.
pub(crate) struct StoreShared {
    pub(crate) oracle: Arc<dyn TimestampOracle>,
    pub(crate) versions: VersionStore,
    pub(crate) last_commit: LastCommitIndex,
    pub(crate) tracker: DependencyTracker,
    /// Serializes validate-then-apply across commits.
    pub(crate) commit_lock: Mutex<()>,
    /// A globally increasing counter for generating unique transaction IDs.
    transaction_counter: AtomicU64,
    /// Start timestamps of the optimistic transactions still running.
    active: Mutex<HashMap<TransactionId, Timestamp>>,
    config: StoreConfig,
}

impl StoreShared {
    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        self.transaction_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn register_active(&self, id: TransactionId, start_ts: Timestamp) {
        self.active.lock().insert(id, start_ts);
    }

    pub(crate) fn unregister_active(&self, id: TransactionId) {
        self.active.lock().remove(&id);
    }

    pub(crate) fn policy(&self, level: IsolationLevel) -> &'static dyn IsolationPolicy {
        self.config.policy(level)
    }
}

/// The main entry point for the Thoth multi-version transaction store.
///
/// A `Store` is cheap to clone; clones share the same data, oracle and transactions,
/// so handing a clone to each worker thread is the intended way to share it.
///
/// Two surfaces are offered:
/// - optimistic [`Transaction`]s validated at commit by their [`IsolationLevel`],
/// - a pessimistic prewrite/commit protocol keyed by caller-supplied start timestamps
///   ([`Store::prewrite`], [`Store::commit_key`], [`Store::get`]), also driven by
///   [`PessimisticTransaction`].
#[derive(Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

impl Default for Store {
    fn default() -> Self {
        Self::open()
    }
}

impl Store {
    /// Opens an empty store with the default configuration.
    pub fn open() -> Self {
        let config = StoreConfig::default();
        let oracle = Arc::new(LocalTimestampOracle::with_initial(
            config.initial_timestamp,
            config.timestamp_step,
        ));
        Self::build(config, oracle)
    }

    /// Opens an empty store after validating `config`.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let oracle = Arc::new(LocalTimestampOracle::with_initial(
            config.initial_timestamp,
            config.timestamp_step,
        ));
        Ok(Self::build(config, oracle))
    }

    /// Opens an empty store that draws its timestamps from `oracle`.
    ///
    /// `initial_timestamp` and `timestamp_step` of `config` are ignored.
    pub fn with_oracle(config: StoreConfig, oracle: Arc<dyn TimestampOracle>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, oracle))
    }

    fn build(config: StoreConfig, oracle: Arc<dyn TimestampOracle>) -> Self {
        debug!("Opening store with {:?}", config);
        Self {
            shared: Arc::new(StoreShared {
                oracle,
                versions: VersionStore::new(),
                last_commit: LastCommitIndex::new(),
                tracker: DependencyTracker::new(config.tracker_prune_interval),
                commit_lock: Mutex::new(()),
                transaction_counter: AtomicU64::new(0),
                active: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Starts a new optimistic transaction at `isolation_level`.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Transaction {
        Transaction::begin(Arc::clone(&self.shared), isolation_level)
    }

    /// Starts a new optimistic transaction at the configured default isolation level.
    pub fn begin_default(&self) -> Transaction {
        self.begin(self.shared.config.default_isolation)
    }

    /// Starts a pessimistic transaction with a start timestamp drawn from the oracle.
    pub fn begin_pessimistic(&self) -> PessimisticTransaction {
        let start_ts = {
            let _commit_guard = self.shared.commit_lock.lock();
            self.shared.oracle.next()
        };
        PessimisticTransaction::new(Arc::clone(&self.shared), start_ts)
    }

    /// Locks `key` for the transaction started at `start_ts` and writes a tentative
    /// version of it.
    ///
    /// Fails with [`crate::ThothError::LockConflict`] if another start timestamp holds
    /// the lock, and with [`crate::ThothError::InvalidTimestamp`] if `start_ts` is too
    /// close to `u64::MAX` for a commit timestamp to follow it.
    pub fn prewrite(&self, key: &str, value: impl Into<Vec<u8>>, start_ts: Timestamp) -> Result<()> {
        LockManager::new(&self.shared).prewrite(key, Arc::new(value.into()), start_ts)
    }

    /// Commits the tentative version locked by `start_ts` and returns its commit
    /// timestamp.
    pub fn commit_key(&self, key: &str, start_ts: Timestamp) -> Result<Timestamp> {
        LockManager::new(&self.shared).commit_key(key, start_ts)
    }

    /// Reads the newest version of `key` committed at or before `read_ts`.
    ///
    /// A `read_ts` too close to `u64::MAX` is rejected with
    /// [`crate::ThothError::InvalidTimestamp`].
    pub fn get(&self, key: &str, read_ts: Timestamp) -> Result<Value> {
        LockManager::new(&self.shared).get(key, read_ts)
    }

    /// Releases the lock held by `start_ts` on `key` and discards its tentative version.
    pub fn rollback_key(&self, key: &str, start_ts: Timestamp) -> Result<()> {
        LockManager::new(&self.shared).rollback_key(key, start_ts)
    }

    pub fn oracle(&self) -> &dyn TimestampOracle {
        self.shared.oracle.as_ref()
    }

    /// Most recent commit timestamp of `key`, from either surface.
    pub fn last_commit(&self, key: &str) -> Option<Timestamp> {
        self.shared.last_commit.get(key)
    }

    /// Every version of `key`, oldest first, including intents and locked versions.
    pub fn versions(&self, key: &str) -> Vec<Version> {
        self.shared.versions.versions(key)
    }

    /// Ids of the optimistic transactions that have not finished, in begin order.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.shared.active.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Serializable transactions (running or retained committed) known to the
    /// dependency tracker.
    pub fn tracked_transactions(&self) -> usize {
        self.shared.tracker.tracked_count()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.shared.versions.len())
            .field("current_ts", &self.shared.oracle.current())
            .field("config", &self.shared.config)
            .finish()
    }
}
