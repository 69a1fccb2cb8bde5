use crossbeam_skiplist::SkipMap;
use log::trace;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::data_store::version::Version;
use crate::data_store::version_chain::VersionChain;
use crate::isolation::IsolationPolicy;
use crate::oracle::Timestamp;
use crate::transaction::TransactionId;

/// The key type for data items in the store.
type DataKey = String;

/// Per-key version chains held in a lock-free `SkipMap`.
///
/// The map itself never needs a store-wide lock; every chain sits behind its own
/// `RwLock`, so an append, an intent replacement or a commit stamp is applied
/// atomically for that key and readers never observe it half-done.
pub struct VersionStore {
    chains: SkipMap<DataKey, Arc<RwLock<VersionChain>>>,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore {
    /// Creates a new, empty `VersionStore`.
    pub fn new() -> Self {
        Self {
            chains: SkipMap::new(),
        }
    }

    /// Number of keys that have (or had) a chain.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub(crate) fn chain(&self, key: &str) -> Option<Arc<RwLock<VersionChain>>> {
        self.chains.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn chain_or_create(&self, key: &str) -> Arc<RwLock<VersionChain>> {
        if let Some(chain) = self.chain(key) {
            return chain;
        }
        // Racing creators all get the entry that won the insert.
        let entry = self
            .chains
            .get_or_insert(key.to_string(), Arc::new(RwLock::new(VersionChain::new())));
        Arc::clone(entry.value())
    }

    /// Runs `f` with exclusive access to the chain of `key`, creating it if needed.
    pub(crate) fn with_chain_mut<R>(&self, key: &str, f: impl FnOnce(&mut VersionChain) -> R) -> R {
        let chain = self.chain_or_create(key);
        let mut guard = chain.write();
        f(&mut guard)
    }

    /// Adds a version at its ordered position in the key's chain.
    pub fn append_version(&self, key: &str, version: Version) {
        trace!(
            "Appending version of '{}' (order {})",
            key,
            version.order_key()
        );
        self.with_chain_mut(key, |chain| chain.insert(version));
    }

    /// Publishes an uncommitted intent, replacing an earlier intent of the same writer.
    pub fn put_intent(&self, key: &str, version: Version) {
        trace!(
            "Tx {} published intent on '{}'",
            version.created_by(),
            key
        );
        self.with_chain_mut(key, |chain| {
            chain.put_intent(version);
        });
    }

    /// Swaps the writer's intent for its committed version in one step.
    pub fn commit_intent(&self, key: &str, version: Version) {
        trace!(
            "Tx {} committed '{}' at {:?}",
            version.created_by(),
            key,
            version.commit_timestamp()
        );
        self.with_chain_mut(key, |chain| chain.commit_intent(version));
    }

    /// Discards the intent of an aborted writer. Returns whether one was found.
    pub fn remove_intent(&self, key: &str, txn_id: TransactionId) -> bool {
        match self.chain(key) {
            Some(chain) => chain.write().take_intent(txn_id).is_some(),
            None => false,
        }
    }

    /// The version of `key` selected by `policy` relative to `boundary`.
    pub fn visible_version(
        &self,
        key: &str,
        boundary: Timestamp,
        policy: &dyn IsolationPolicy,
    ) -> Option<Version> {
        let chain = self.chain(key)?;
        let guard = chain.read();
        policy.visible(&guard, boundary).cloned()
    }

    /// Copy of every version of `key`, oldest first.
    pub fn versions(&self, key: &str) -> Vec<Version> {
        self.chain(key)
            .map(|chain| chain.read().iter().cloned().collect())
            .unwrap_or_default()
    }
}
