//! Common utilities for Thoth integration tests.
#![allow(dead_code)]

use thoth::{IsolationLevel, Store, StoreConfig, Transaction};

/// Helper function to create a store whose default isolation is `isolation`.
pub fn setup_store(isolation: IsolationLevel) -> Store {
    Store::with_config(StoreConfig {
        default_isolation: isolation,
        ..StoreConfig::default()
    })
    .expect("default config is valid")
}

/// Commits `pairs` in a single transaction.
pub fn seed(store: &Store, pairs: &[(&str, &str)]) {
    let mut txn = store.begin(IsolationLevel::Snapshot);
    for (key, value) in pairs {
        txn.write(*key, *value).unwrap();
    }
    txn.commit().unwrap();
}

/// Reads `key` and decodes it as UTF-8.
pub fn read_str(txn: &mut Transaction, key: &str) -> Option<String> {
    txn.read(key)
        .unwrap()
        .map(|value| String::from_utf8(value.to_vec()).unwrap())
}

/// Reads `key` and parses it as an integer.
pub fn read_i64(txn: &mut Transaction, key: &str) -> thoth::Result<i64> {
    Ok(txn
        .read(key)?
        .map(|value| String::from_utf8_lossy(&value).parse().unwrap())
        .unwrap_or(0))
}
