use crate::data_store::version::Version;
use crate::oracle::Timestamp;
use crate::transaction::TransactionId;

/// Ordered versions of a single key, oldest first.
///
/// Entries are kept sorted by [`Version::order_key`]. Entries with equal ordering keys
/// keep their insertion order, so on ties the later inserted entry is the newer one.
/// At most one entry is locked at any time.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: Vec<Version>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Versions from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Version> {
        self.versions.iter()
    }

    /// Newest entry regardless of commit status.
    pub fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    pub fn latest_committed(&self) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.is_committed())
    }

    /// Newest committed entry whose commit timestamp is at most `bound`.
    pub fn latest_committed_at(&self, bound: Timestamp) -> Option<&Version> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.commit_timestamp().is_some_and(|ts| ts <= bound))
    }

    /// Inserts `version` at its ordered position.
    pub fn insert(&mut self, version: Version) {
        let order = version.order_key();
        let at = self.versions.partition_point(|v| v.order_key() <= order);
        self.versions.insert(at, version);
    }

    /// Publishes `version` as the intent of its creator, replacing an earlier intent of
    /// the same transaction. Returns the replaced intent.
    pub fn put_intent(&mut self, version: Version) -> Option<Version> {
        let previous = self.take_intent(version.created_by());
        self.insert(version);
        previous
    }

    pub fn take_intent(&mut self, txn_id: TransactionId) -> Option<Version> {
        let at = self.versions.iter().position(|v| v.is_intent_of(txn_id))?;
        Some(self.versions.remove(at))
    }

    /// Replaces the intent of `version.created_by()` (if any) with the committed `version`.
    pub fn commit_intent(&mut self, version: Version) {
        debug_assert!(version.is_committed());
        self.take_intent(version.created_by());
        self.insert(version);
    }

    pub fn locked(&self) -> Option<&Version> {
        self.versions.iter().find(|v| v.is_locked())
    }

    /// Installs a locked version. A previous lock of the same holder is replaced.
    ///
    /// Callers must have checked that no other holder owns the lock.
    pub fn lock(&mut self, version: Version) {
        debug_assert!(version.is_locked());
        if let Some(holder) = version.lock_holder() {
            self.unlock(holder);
        }
        debug_assert!(self.locked().is_none(), "key locked by another holder");
        self.insert(version);
    }

    /// Drops the locked version held by `holder`, returning it.
    pub fn unlock(&mut self, holder: Timestamp) -> Option<Version> {
        let at = self
            .versions
            .iter()
            .position(|v| v.lock_holder() == Some(holder))?;
        Some(self.versions.remove(at))
    }

    /// Turns the version locked by `holder` into a committed one.
    pub fn stamp_lock(&mut self, holder: Timestamp, commit_ts: Timestamp) -> Option<&Version> {
        let locked = self.unlock(holder)?;
        self.insert(locked.into_committed(commit_ts));
        self.versions
            .iter()
            .rev()
            .find(|v| v.commit_timestamp() == Some(commit_ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn val(s: &str) -> crate::data_store::version::Value {
        Arc::new(s.as_bytes().to_vec())
    }

    #[test]
    fn keeps_versions_ordered_by_commit_or_start_timestamp() {
        let mut chain = VersionChain::new();
        chain.insert(Version::committed(val("a"), 1, 1, 10));
        chain.insert(Version::intent(val("b"), 2, 5));
        chain.insert(Version::committed(val("c"), 3, 3, 7));

        let order: Vec<_> = chain.iter().map(Version::order_key).collect();
        assert_eq!(order, vec![5, 7, 10]);
        assert_eq!(chain.latest().unwrap().value().as_slice(), b"a");
    }

    #[test]
    fn ties_resolve_to_the_later_insertion() {
        let mut chain = VersionChain::new();
        chain.insert(Version::intent(val("first"), 1, 4));
        chain.insert(Version::intent(val("second"), 2, 4));
        assert_eq!(chain.latest().unwrap().value().as_slice(), b"second");
    }

    #[test]
    fn snapshot_bound_selects_newest_committed_at_or_before() {
        let mut chain = VersionChain::new();
        chain.insert(Version::committed(val("v1"), 1, 1, 2));
        chain.insert(Version::committed(val("v2"), 2, 3, 6));
        chain.insert(Version::intent(val("pending"), 3, 7));

        assert!(chain.latest_committed_at(1).is_none());
        assert_eq!(chain.latest_committed_at(5).unwrap().value().as_slice(), b"v1");
        assert_eq!(chain.latest_committed_at(6).unwrap().value().as_slice(), b"v2");
        assert_eq!(chain.latest_committed().unwrap().value().as_slice(), b"v2");
    }

    #[test]
    fn intents_are_replaced_and_committed_in_place() {
        let mut chain = VersionChain::new();
        chain.put_intent(Version::intent(val("x1"), 9, 3));
        let replaced = chain.put_intent(Version::intent(val("x2"), 9, 3));
        assert_eq!(replaced.unwrap().value().as_slice(), b"x1");
        assert_eq!(chain.len(), 1);

        chain.commit_intent(Version::committed(val("x2"), 9, 3, 8));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.latest().unwrap().commit_timestamp(), Some(8));
        assert!(chain.take_intent(9).is_none());
    }

    #[test]
    fn lock_lifecycle() {
        let mut chain = VersionChain::new();
        chain.lock(Version::locked(val("v"), 100));
        assert_eq!(chain.locked().unwrap().lock_holder(), Some(100));

        let stamped = chain.stamp_lock(100, 102).unwrap();
        assert_eq!(stamped.commit_timestamp(), Some(102));
        assert_eq!(stamped.lock_holder(), None);
        assert!(chain.locked().is_none());
        assert!(chain.unlock(100).is_none());
    }
}
