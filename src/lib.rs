//! Thoth is an in-memory multi-version transactional key/value store.
//!
//! Every key holds a chain of versions ordered by timestamps from a [`TimestampOracle`].
//! Optimistic [`Transaction`]s read through the visibility rule of their
//! [`IsolationLevel`] and are validated at commit; a pessimistic prewrite/commit
//! protocol locks keys up front instead.
//!
//! ```
//! use thoth::prelude::*;
//!
//! let store = Store::open();
//!
//! let mut setup = store.begin(IsolationLevel::Serializable);
//! setup.write("balance", "100").unwrap();
//! setup.commit().unwrap();
//!
//! let mut txn = store.begin_default();
//! let balance = txn.read("balance").unwrap().unwrap();
//! assert_eq!(balance.as_slice(), b"100");
//! txn.write("balance", "90").unwrap();
//! txn.commit().unwrap();
//! ```

pub mod config;
pub mod conflict;
pub mod data_store;
pub mod dependency_tracking;
pub mod errors;
pub mod isolation;
pub mod lock_manager;
pub mod oracle;
pub mod store;
pub mod transaction;

pub use store::prelude;

// Re-export key types and structs for easier access
pub use config::StoreConfig;
pub use data_store::version::{Value, Version};
pub use data_store::version_chain::VersionChain;
pub use data_store::version_store::VersionStore;
pub use dependency_tracking::{DependencyTracker, RwConflicts};
pub use errors::{Result, ThothError, ThothError as Error};
pub use isolation::{IsolationLevel, IsolationPolicy};
pub use lock_manager::PessimisticTransaction;
pub use oracle::{LocalTimestampOracle, Timestamp, TimestampOracle};
pub use store::Store;
pub use transaction::{Transaction, TransactionId, TransactionStatus};
