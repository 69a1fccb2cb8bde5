use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::oracle::Timestamp;
use crate::transaction::TransactionId;

/// Whether a tracked transaction can still gain edges of its own accord.
///
/// Aborted transactions are forgotten outright, so they need no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnState {
    /// Still reading and writing.
    Active,
    /// Committed but retained while overlapping transactions may still form edges
    /// with it.
    Committed,
}

/// A node of the rw-antidependency graph: its lifetime interval, the keys it touched
/// and its edges in both directions.
#[derive(Debug, Clone)]
pub(crate) struct TransactionInfo {
    pub(crate) state: TxnState,
    pub(crate) start_ts: Timestamp,
    pub(crate) commit_ts: Option<Timestamp>,
    /// Keys this transaction read. Kept after commit: a committed reader still forms rw
    /// edges with writers it overlapped.
    pub(crate) reads: HashSet<String>,
    pub(crate) writes: HashSet<String>,
    /// Readers whose read this transaction overwrites (edges `reader -> self`).
    pub(crate) incoming: HashSet<TransactionId>,
    /// Writers that overwrite something this transaction read (edges `self -> writer`).
    pub(crate) outgoing: HashSet<TransactionId>,
}

impl TransactionInfo {
    fn new(start_ts: Timestamp) -> Self {
        Self {
            state: TxnState::Active,
            start_ts,
            commit_ts: None,
            reads: HashSet::new(),
            writes: HashSet::new(),
            incoming: HashSet::new(),
            outgoing: HashSet::new(),
        }
    }

    /// Neither committed before the other started.
    fn overlaps(&self, other: &TransactionInfo) -> bool {
        self.commit_ts.is_none_or(|c| c > other.start_ts)
            && other.commit_ts.is_none_or(|c| c > self.start_ts)
    }
}

/// Tracked transactions that read or wrote one key, used to find edge endpoints.
#[derive(Debug, Clone, Default)]
pub(crate) struct ItemDependency {
    pub(crate) readers: HashSet<TransactionId>,
    pub(crate) writers: HashSet<TransactionId>,
}

/// The rw-antidependency flags of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RwConflicts {
    /// Some concurrent transaction read a value this transaction overwrites.
    pub incoming: bool,
    /// This transaction read a value some concurrent transaction overwrites.
    pub outgoing: bool,
}

impl RwConflicts {
    /// Both edges at once: the transaction is the pivot of a dangerous structure.
    pub fn is_pivot(&self) -> bool {
        self.incoming && self.outgoing
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    transactions: HashMap<TransactionId, TransactionInfo>,
    item_dependencies: HashMap<String, ItemDependency>,
}

impl TrackerState {
    fn add_edge(&mut self, reader: TransactionId, writer: TransactionId) {
        let mut added = false;
        if let Some(info) = self.transactions.get_mut(&reader) {
            added = info.outgoing.insert(writer);
        }
        if let Some(info) = self.transactions.get_mut(&writer) {
            info.incoming.insert(reader);
        }
        if added {
            debug!("RW edge: Tx {} -> Tx {}", reader, writer);
        }
    }

    /// Transactions in `candidates` (other than `txn_id`) that overlap `txn_id`.
    fn overlapping(
        &self,
        txn_id: TransactionId,
        candidates: Option<&HashSet<TransactionId>>,
    ) -> Vec<TransactionId> {
        let Some(me) = self.transactions.get(&txn_id) else {
            return Vec::new();
        };
        candidates
            .into_iter()
            .flatten()
            .filter(|&&other| other != txn_id)
            .filter(|other| {
                self.transactions
                    .get(other)
                    .is_some_and(|info| info.overlaps(me))
            })
            .copied()
            .collect()
    }

    fn is_active(&self, txn_id: TransactionId) -> bool {
        self.transactions
            .get(&txn_id)
            .is_some_and(|info| info.state == TxnState::Active)
    }

    fn flags(&self, txn_id: TransactionId) -> RwConflicts {
        self.transactions
            .get(&txn_id)
            .map(|info| RwConflicts {
                incoming: !info.incoming.is_empty(),
                outgoing: !info.outgoing.is_empty(),
            })
            .unwrap_or_default()
    }

    /// Drops a transaction together with its item entries and every edge touching it.
    fn forget(&mut self, txn_id: TransactionId) {
        let Some(info) = self.transactions.remove(&txn_id) else {
            return;
        };
        for peer in info.incoming.iter() {
            if let Some(peer_info) = self.transactions.get_mut(peer) {
                peer_info.outgoing.remove(&txn_id);
            }
        }
        for peer in info.outgoing.iter() {
            if let Some(peer_info) = self.transactions.get_mut(peer) {
                peer_info.incoming.remove(&txn_id);
            }
        }
        for key in info.reads.iter().chain(info.writes.iter()) {
            if let Some(dep) = self.item_dependencies.get_mut(key) {
                dep.readers.remove(&txn_id);
                dep.writers.remove(&txn_id);
                if dep.readers.is_empty() && dep.writers.is_empty() {
                    self.item_dependencies.remove(key);
                }
            }
        }
    }
}

/// The rw-antidependency graph over concurrent serializable transactions.
///
/// Edges are explicit `reader -> writer` pairs stored on both endpoints, so the set is
/// bounded by the number of overlapping transactions. An edge `R -> W` exists when `R`
/// read a key that `W` writes while the two overlapped. Edges of an aborted transaction
/// are dropped at once; a committed transaction keeps its reads, writes and edges until
/// no active transaction overlaps it anymore.
pub struct DependencyTracker {
    state: RwLock<TrackerState>,
    // Counter for triggering pruning periodically
    terminations: AtomicU64,
    prune_interval: u64,
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new(64)
    }
}

impl DependencyTracker {
    /// Creates a tracker that prunes finished transactions every `prune_interval`
    /// terminations.
    pub fn new(prune_interval: u64) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            terminations: AtomicU64::new(0),
            prune_interval: prune_interval.max(1),
        }
    }

    /// Adds a serializable transaction to the graph, with no edges yet.
    pub fn register_txn(&self, txn_id: TransactionId, start_ts: Timestamp) {
        self.state
            .write()
            .transactions
            .insert(txn_id, TransactionInfo::new(start_ts));
        debug!("Tracking Tx {} from start {}", txn_id, start_ts);
    }

    /// Records that an active transaction read `key` and adds an edge to every
    /// overlapping transaction that writes it.
    ///
    /// Returns the reader's flags after the update.
    pub fn record_read(&self, reader_id: TransactionId, key: &str) -> RwConflicts {
        let mut state = self.state.write();
        if !state.is_active(reader_id) {
            return state.flags(reader_id);
        }
        if let Some(info) = state.transactions.get_mut(&reader_id) {
            info.reads.insert(key.to_string());
        }
        let dep = state.item_dependencies.entry(key.to_string()).or_default();
        dep.readers.insert(reader_id);

        let writers = state.overlapping(reader_id, state.item_dependencies.get(key).map(|d| &d.writers));
        for writer in writers {
            state.add_edge(reader_id, writer);
        }
        state.flags(reader_id)
    }

    /// Records that an active transaction writes `key` and adds an edge from every
    /// overlapping transaction that read it.
    ///
    /// Returns the writer's flags after the update.
    pub fn record_write(&self, writer_id: TransactionId, key: &str) -> RwConflicts {
        let mut state = self.state.write();
        if !state.is_active(writer_id) {
            return state.flags(writer_id);
        }
        if let Some(info) = state.transactions.get_mut(&writer_id) {
            info.writes.insert(key.to_string());
        }
        let dep = state.item_dependencies.entry(key.to_string()).or_default();
        dep.writers.insert(writer_id);

        let readers = state.overlapping(writer_id, state.item_dependencies.get(key).map(|d| &d.readers));
        for reader in readers {
            state.add_edge(reader, writer_id);
        }
        state.flags(writer_id)
    }

    pub fn conflicts(&self, txn_id: TransactionId) -> RwConflicts {
        self.state.read().flags(txn_id)
    }

    pub fn is_pivot(&self, txn_id: TransactionId) -> bool {
        self.conflicts(txn_id).is_pivot()
    }

    /// Closes the lifetime interval of a transaction at `commit_ts`. Its reads, writes
    /// and edges stay until pruning finds no active transaction overlapping it.
    pub fn mark_committed(&self, txn_id: TransactionId, commit_ts: Timestamp) {
        let found = {
            let mut state = self.state.write();
            match state.transactions.get_mut(&txn_id) {
                Some(info) => {
                    info.state = TxnState::Committed;
                    info.commit_ts = Some(commit_ts);
                    true
                }
                None => false,
            }
        };
        if found {
            debug!("Tx {} committed at {}, edges retained", txn_id, commit_ts);
        } else {
            debug!("Tx {} committed but was not tracked", txn_id);
        }
        self.maybe_trigger_prune();
    }

    /// Removes an aborted transaction from the graph along with every edge touching it.
    pub fn mark_aborted(&self, txn_id: TransactionId) {
        self.state.write().forget(txn_id);
        debug!("Tx {} aborted, edges dropped", txn_id);
        self.maybe_trigger_prune();
    }

    /// Number of transactions still tracked (active or retained committed).
    pub fn tracked_count(&self) -> usize {
        self.state.read().transactions.len()
    }

    /// Number of `reader -> writer` edges currently held.
    pub fn edge_count(&self) -> usize {
        self.state
            .read()
            .transactions
            .values()
            .map(|info| info.outgoing.len())
            .sum()
    }

    fn maybe_trigger_prune(&self) {
        let count = self.terminations.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.prune_interval == 0 {
            self.prune();
        }
    }

    /// Forgets committed transactions that no active transaction overlaps.
    ///
    /// Such a transaction can never gain a new edge, and any edge it has leads to
    /// transactions that are finished too.
    pub fn prune(&self) {
        let mut state = self.state.write();
        let oldest_active = state
            .transactions
            .values()
            .filter(|info| info.state == TxnState::Active)
            .map(|info| info.start_ts)
            .min();

        let finished: Vec<TransactionId> = state
            .transactions
            .iter()
            .filter(|(_, info)| match (info.commit_ts, oldest_active) {
                (Some(commit_ts), Some(oldest)) => commit_ts <= oldest,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .map(|(&id, _)| id)
            .collect();

        let pruned = finished.len();
        for txn_id in finished {
            state.forget(txn_id);
        }
        if pruned > 0 {
            debug!("Pruned {} finished transactions from the tracker.", pruned);
        }
    }
}
