use ahash::AHashMap as HashMap;
use parking_lot::RwLock;

use crate::oracle::Timestamp;

/// Most recent commit timestamp per key.
///
/// Lets commit validation answer "was this key committed after I started?" without
/// walking the version chain.
#[derive(Default)]
pub struct LastCommitIndex {
    commits: RwLock<HashMap<String, Timestamp>>,
}

impl LastCommitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Timestamp> {
        self.commits.read().get(key).copied()
    }

    /// Records a commit of `key` at `commit_ts`. The index never moves backwards.
    pub fn record(&self, key: &str, commit_ts: Timestamp) {
        let mut commits = self.commits.write();
        match commits.get_mut(key) {
            Some(ts) => *ts = (*ts).max(commit_ts),
            None => {
                commits.insert(key.to_string(), commit_ts);
            }
        }
    }

    /// The commit timestamp of `key` if it is later than `start_ts`.
    pub fn committed_after(&self, key: &str, start_ts: Timestamp) -> Option<Timestamp> {
        self.get(key).filter(|&ts| ts > start_ts)
    }
}
