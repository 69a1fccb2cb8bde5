use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::conflict::detection::{ConflictChecks, detect_conflicts};
use crate::data_store::last_commit::LastCommitIndex;
use crate::data_store::version::{Value, Version};
use crate::data_store::version_chain::VersionChain;
use crate::dependency_tracking::DependencyTracker;
use crate::errors::Result;
use crate::oracle::Timestamp;
use crate::transaction::TransactionId;

/// Defines the isolation levels supported by Thoth.
///
/// Transaction isolation levels determine how concurrent transactions interact with each other
/// and the degree to which one transaction's operations are visible to others. Higher isolation
/// levels provide stronger guarantees about data consistency but reject more commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// **Read Uncommitted:**
    ///
    /// Reads return the newest version of a key whatever its commit status, so a
    /// transaction may observe writes of others that have not committed yet (and may
    /// never commit). Commit is unconditional.
    ReadUncommitted,
    /// **Read Committed:**
    ///
    /// Reads return the newest committed version at the moment of the read. Reading the
    /// same key twice may return different values if another transaction commits in
    /// between. By default commits still follow first-committer-wins on written keys;
    /// see [`crate::StoreConfig::read_committed_write_check`].
    ReadCommitted,
    /// **Snapshot / Repeatable Read:**
    ///
    /// Reads see the committed state as of the transaction's start timestamp, and the
    /// first read of a key pins it for the rest of the transaction. At commit, any key in
    /// the read set that was committed by someone else after the start aborts the
    /// transaction, as does any written key that was.
    Snapshot,
    /// **Serializable:**
    ///
    /// Serializable Snapshot Isolation. Reads behave like [`IsolationLevel::Snapshot`];
    /// in addition the store tracks rw-antidependencies between concurrent serializable
    /// transactions and aborts any transaction that becomes the pivot of a dangerous
    /// structure (an incoming and an outgoing rw edge at once).
    Serializable,
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::Snapshot,
        IsolationLevel::Serializable,
    ];

    /// The policy implementing this level.
    pub fn policy(self) -> &'static dyn IsolationPolicy {
        match self {
            IsolationLevel::ReadUncommitted => &ReadUncommittedPolicy,
            IsolationLevel::ReadCommitted => &ReadCommittedPolicy::CHECKED,
            IsolationLevel::Snapshot => &SnapshotPolicy,
            IsolationLevel::Serializable => &SerializablePolicy,
        }
    }
}

/// What a transaction observed on first read of a key.
pub type ReadSet = HashMap<String, Version>;

/// Pending writes of a transaction.
pub type WriteBuffer = HashMap<String, Value>;

/// Everything a validation rule may inspect while the commit lock is held.
pub struct ValidationContext<'a> {
    pub txn_id: TransactionId,
    pub start_ts: Timestamp,
    pub read_set: &'a ReadSet,
    pub write_buffer: &'a WriteBuffer,
    pub last_commit: &'a LastCommitIndex,
    pub tracker: &'a DependencyTracker,
}

/// Visibility and validation rules of one isolation level.
///
/// All levels share the same begin, write and buffering mechanics; they differ only in
/// which version a read selects and in what commit has to check.
pub trait IsolationPolicy: Send + Sync {
    fn level(&self) -> IsolationLevel;

    /// Selects the version of a key a read may see. `boundary` is the reading
    /// transaction's start timestamp.
    fn visible<'c>(&self, chain: &'c VersionChain, boundary: Timestamp) -> Option<&'c Version>;

    /// Whether the first read of a key pins its value for the rest of the transaction.
    fn pins_reads(&self) -> bool {
        false
    }

    /// Whether reads and writes are reported to the dependency tracker.
    fn tracks_dependencies(&self) -> bool {
        false
    }

    /// Decides whether a transaction may commit.
    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadUncommittedPolicy;

impl IsolationPolicy for ReadUncommittedPolicy {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::ReadUncommitted
    }

    fn visible<'c>(&self, chain: &'c VersionChain, _boundary: Timestamp) -> Option<&'c Version> {
        chain.latest()
    }

    fn validate(&self, _ctx: &ValidationContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadCommittedPolicy {
    pub first_committer_wins: bool,
}

impl ReadCommittedPolicy {
    pub const CHECKED: ReadCommittedPolicy = ReadCommittedPolicy {
        first_committer_wins: true,
    };
    pub const UNCHECKED: ReadCommittedPolicy = ReadCommittedPolicy {
        first_committer_wins: false,
    };
}

impl IsolationPolicy for ReadCommittedPolicy {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    fn visible<'c>(&self, chain: &'c VersionChain, _boundary: Timestamp) -> Option<&'c Version> {
        chain.latest_committed()
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        let checks = if self.first_committer_wins {
            ConflictChecks::WRITE_WRITE
        } else {
            ConflictChecks::NONE
        };
        detect_conflicts(ctx, checks)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotPolicy;

impl IsolationPolicy for SnapshotPolicy {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::Snapshot
    }

    fn visible<'c>(&self, chain: &'c VersionChain, boundary: Timestamp) -> Option<&'c Version> {
        chain.latest_committed_at(boundary)
    }

    fn pins_reads(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        detect_conflicts(ctx, ConflictChecks::SNAPSHOT)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerializablePolicy;

impl IsolationPolicy for SerializablePolicy {
    fn level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn visible<'c>(&self, chain: &'c VersionChain, boundary: Timestamp) -> Option<&'c Version> {
        SnapshotPolicy.visible(chain, boundary)
    }

    fn pins_reads(&self) -> bool {
        true
    }

    fn tracks_dependencies(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        detect_conflicts(ctx, ConflictChecks::SERIALIZABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn chain() -> VersionChain {
        let mut chain = VersionChain::new();
        chain.insert(Version::committed(Arc::new(b"old".to_vec()), 1, 1, 2));
        chain.insert(Version::committed(Arc::new(b"new".to_vec()), 2, 3, 8));
        chain.insert(Version::intent(Arc::new(b"dirty".to_vec()), 3, 9));
        chain
    }

    fn seen(level: IsolationLevel, boundary: Timestamp) -> Option<String> {
        let chain = chain();
        level
            .policy()
            .visible(&chain, boundary)
            .map(|v| String::from_utf8(v.value().to_vec()).unwrap())
    }

    #[test]
    fn visibility_rules_per_level() {
        assert_eq!(seen(IsolationLevel::ReadUncommitted, 5).as_deref(), Some("dirty"));
        assert_eq!(seen(IsolationLevel::ReadCommitted, 5).as_deref(), Some("new"));
        assert_eq!(seen(IsolationLevel::Snapshot, 5).as_deref(), Some("old"));
        assert_eq!(seen(IsolationLevel::Serializable, 5).as_deref(), Some("old"));
        assert_eq!(seen(IsolationLevel::Snapshot, 1), None);
    }

    #[test]
    fn policies_report_their_level() {
        for level in IsolationLevel::ALL {
            assert_eq!(level.policy().level(), level);
        }
        assert!(IsolationLevel::Snapshot.policy().pins_reads());
        assert!(!IsolationLevel::ReadCommitted.policy().pins_reads());
        assert!(IsolationLevel::Serializable.policy().tracks_dependencies());
        assert!(!IsolationLevel::Snapshot.policy().tracks_dependencies());
    }
}
