/// Most recent commit timestamp per key.
pub mod last_commit;
/// A single stored version.
pub mod version;
/// Ordered versions of one key.
pub mod version_chain;
/// Concurrent map of keys to version chains.
pub mod version_store;
