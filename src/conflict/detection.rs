use log::debug;

use crate::errors::{Result, ThothError};
use crate::isolation::ValidationContext;
use crate::oracle::Timestamp;
use crate::transaction::TransactionId;

/// Represents the type of conflict detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// Another transaction committed a key this transaction writes after it started.
    WriteWrite,
    /// Another transaction committed a key this transaction read after it started.
    StaleRead,
    /// The transaction holds both an incoming and an outgoing rw-antidependency.
    DangerousStructure,
}

/// A conflict found while validating a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictType,
    /// Key the conflict was found on. Dangerous structures span several keys.
    pub key: Option<String>,
    /// Commit timestamp of the conflicting write, if there is one.
    pub committed_at: Option<Timestamp>,
}

impl Conflict {
    pub fn into_error(self, txn_id: TransactionId) -> ThothError {
        let key = self.key.unwrap_or_default();
        let committed_at = self.committed_at.unwrap_or_default();
        match self.kind {
            ConflictType::WriteWrite => ThothError::WriteWriteConflict { key, committed_at },
            ConflictType::StaleRead => ThothError::StaleReadConflict { key, committed_at },
            ConflictType::DangerousStructure => ThothError::DangerousStructure { id: txn_id },
        }
    }
}

/// Which checks a validation rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConflictChecks {
    pub write_write: bool,
    pub stale_reads: bool,
    pub dangerous_structure: bool,
}

impl ConflictChecks {
    pub const NONE: ConflictChecks = ConflictChecks {
        write_write: false,
        stale_reads: false,
        dangerous_structure: false,
    };
    pub const WRITE_WRITE: ConflictChecks = ConflictChecks {
        write_write: true,
        ..Self::NONE
    };
    pub const SNAPSHOT: ConflictChecks = ConflictChecks {
        stale_reads: true,
        ..Self::WRITE_WRITE
    };
    pub const SERIALIZABLE: ConflictChecks = ConflictChecks {
        dangerous_structure: true,
        ..Self::SNAPSHOT
    };
}

/// First-committer-wins: a written key committed by someone else after our start.
pub fn detect_write_write(ctx: &ValidationContext<'_>) -> Option<Conflict> {
    sorted(ctx.write_buffer.keys()).into_iter().find_map(|key| {
        ctx.last_commit
            .committed_after(key, ctx.start_ts)
            .map(|committed_at| Conflict {
                kind: ConflictType::WriteWrite,
                key: Some(key.clone()),
                committed_at: Some(committed_at),
            })
    })
}

/// A key in the read set was committed by someone else after our start, so the
/// snapshot we read from is stale.
pub fn detect_stale_reads(ctx: &ValidationContext<'_>) -> Option<Conflict> {
    sorted(ctx.read_set.keys()).into_iter().find_map(|key| {
        ctx.last_commit
            .committed_after(key, ctx.start_ts)
            .map(|committed_at| Conflict {
                kind: ConflictType::StaleRead,
                key: Some(key.clone()),
                committed_at: Some(committed_at),
            })
    })
}

pub fn detect_dangerous_structure(ctx: &ValidationContext<'_>) -> Option<Conflict> {
    ctx.tracker.is_pivot(ctx.txn_id).then_some(Conflict {
        kind: ConflictType::DangerousStructure,
        key: None,
        committed_at: None,
    })
}

/// Runs the selected checks in order (write-write, stale reads, dangerous structure)
/// and reports the first conflict found as an error.
pub fn detect_conflicts(ctx: &ValidationContext<'_>, checks: ConflictChecks) -> Result<()> {
    let conflict = checks
        .write_write
        .then(|| detect_write_write(ctx))
        .flatten()
        .or_else(|| checks.stale_reads.then(|| detect_stale_reads(ctx)).flatten())
        .or_else(|| {
            checks
                .dangerous_structure
                .then(|| detect_dangerous_structure(ctx))
                .flatten()
        });

    match conflict {
        Some(conflict) => {
            debug!(
                "Validation failed for Tx {} (start {}): {:?}",
                ctx.txn_id, ctx.start_ts, conflict
            );
            Err(conflict.into_error(ctx.txn_id))
        }
        None => Ok(()),
    }
}

// Keys are checked in order so the reported conflict does not depend on hash order.
fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a String> {
    let mut keys: Vec<_> = keys.collect();
    keys.sort_unstable();
    keys
}
