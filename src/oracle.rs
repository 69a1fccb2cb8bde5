use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Result, ThothError};

/// Logical timestamp issued by a [`TimestampOracle`].
///
/// `0` is never handed out, so it can be used as "before everything".
pub type Timestamp = u64;

/// Source of ordering truth for the store.
///
/// Every visibility and conflict decision is expressed in terms of these timestamps,
/// never wall-clock time. Implementations must be linearizable: no two calls to
/// [`TimestampOracle::next`] may return the same value, even when invoked concurrently.
pub trait TimestampOracle: Send + Sync {
    /// Issues a timestamp strictly greater than every timestamp issued or observed before.
    fn next(&self) -> Timestamp;

    /// The most recently issued (or observed) timestamp.
    fn current(&self) -> Timestamp;

    /// Advances the oracle so that later issuance is strictly greater than `ts`.
    ///
    /// Used when callers bring their own timestamps (the pessimistic surface takes
    /// explicit start and read timestamps). Never moves the oracle backwards.
    ///
    /// Fails with [`ThothError::InvalidTimestamp`], leaving the oracle untouched, if
    /// no timestamp greater than `ts` could be issued afterwards.
    fn observe(&self, ts: Timestamp) -> Result<()>;
}

/// Oracle backed by a single atomic counter.
#[derive(Debug)]
pub struct LocalTimestampOracle {
    counter: AtomicU64,
    step: u64,
}

impl Default for LocalTimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTimestampOracle {
    pub fn new() -> Self {
        Self::with_initial(0, 1)
    }

    /// Creates an oracle whose first issued timestamp is `initial + step`.
    ///
    /// A zero step is bumped to one and `initial` is capped so that one timestamp can
    /// still be issued; [`crate::StoreConfig::validate`] rejects both earlier.
    pub fn with_initial(initial: Timestamp, step: u64) -> Self {
        let step = step.max(1);
        Self {
            counter: AtomicU64::new(initial.min(Timestamp::MAX - step)),
            step,
        }
    }

    /// Largest value the counter may hold while `next` can still issue a timestamp.
    pub fn ceiling(&self) -> Timestamp {
        Timestamp::MAX - self.step
    }
}

impl TimestampOracle for LocalTimestampOracle {
    // `observe` keeps the counter at or below `ceiling`, so the range only runs out
    // after 2^64 issued timestamps; past that point `next` pins at `u64::MAX`.
    fn next(&self) -> Timestamp {
        let step = self.step;
        let previous = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(c.saturating_add(step))
            })
            .unwrap_or_else(|c| c);
        let ts = previous.saturating_add(step);
        trace!("Oracle issued timestamp {}", ts);
        ts
    }

    fn current(&self) -> Timestamp {
        self.counter.load(Ordering::SeqCst)
    }

    fn observe(&self, ts: Timestamp) -> Result<()> {
        if ts > self.ceiling() {
            return Err(ThothError::InvalidTimestamp {
                ts,
                max: self.ceiling(),
            });
        }
        let previous = self.counter.fetch_max(ts, Ordering::SeqCst);
        if previous < ts {
            trace!("Oracle advanced from {} to observed {}", previous, ts);
        }
        Ok(())
    }
}
