mod common;

use thoth::prelude::*;

use common::{read_str, seed, setup_store};

#[test]
fn test_basic_store_creation() {
    let store = Store::open();

    // Transaction IDs are incrementing and start timestamps come from the oracle
    let first = store.begin_default();
    let second = store.begin_default();
    assert_eq!(first.id() + 1, second.id());
    assert!(first.start_timestamp() < second.start_timestamp());
    assert_eq!(first.isolation_level(), IsolationLevel::Snapshot);
    assert_eq!(store.active_transactions(), vec![first.id(), second.id()]);
}

#[test]
fn test_basic_read_write_commit() {
    let store = setup_store(IsolationLevel::ReadCommitted);

    let mut txn = store.begin_default();
    txn.write("key1", "100").unwrap();
    // Read-your-own-writes
    assert_eq!(read_str(&mut txn, "key1").as_deref(), Some("100"));
    let commit_ts = txn.commit().unwrap();
    assert_eq!(txn.status(), TransactionStatus::Committed);
    assert_eq!(txn.commit_timestamp(), Some(commit_ts));
    assert_eq!(store.last_commit("key1"), Some(commit_ts));

    let mut txn2 = store.begin_default();
    assert_eq!(read_str(&mut txn2, "key1").as_deref(), Some("100"));
    assert_eq!(txn2.read_set_len(), 1);
}

#[test]
fn test_basic_rollback() {
    let store = setup_store(IsolationLevel::ReadCommitted);

    let mut txn = store.begin_default();
    txn.write("key1", "100").unwrap();
    assert_eq!(store.versions("key1").len(), 1, "intent is published at write time");
    assert_eq!(txn.abort(), TransactionStatus::Aborted);
    assert!(store.versions("key1").is_empty(), "abort removes the intent");

    let mut txn2 = store.begin_default();
    assert_eq!(read_str(&mut txn2, "key1"), None);
    assert_eq!(store.last_commit("key1"), None);
}

#[test]
fn test_drop_aborts_active_transaction() {
    let store = Store::open();
    {
        let mut txn = store.begin(IsolationLevel::Serializable);
        txn.write("key1", "dropped").unwrap();
    }
    assert!(store.versions("key1").is_empty());
    assert!(store.active_transactions().is_empty());
    assert_eq!(store.tracked_transactions(), 0);
}

#[test]
fn test_finished_transaction_rejects_operations() {
    let store = Store::open();
    let mut txn = store.begin_default();
    txn.write("key1", "v").unwrap();
    txn.commit().unwrap();

    let id = txn.id();
    assert_eq!(
        txn.read("key1"),
        Err(ThothError::TransactionNotActive {
            id,
            status: TransactionStatus::Committed
        })
    );
    assert!(matches!(
        txn.write("key2", "v"),
        Err(ThothError::TransactionNotActive { .. })
    ));

    let mut aborted = store.begin_default();
    aborted.abort();
    assert!(matches!(
        aborted.commit(),
        Err(ThothError::TransactionNotActive {
            status: TransactionStatus::Aborted,
            ..
        })
    ));
}

#[test]
fn test_commit_and_abort_are_idempotent() {
    let store = Store::open();

    let mut txn = store.begin_default();
    txn.write("key1", "v").unwrap();
    let ts = txn.commit().unwrap();
    assert_eq!(txn.commit().unwrap(), ts);
    assert_eq!(txn.abort(), TransactionStatus::Committed);

    let mut aborted = store.begin_default();
    assert_eq!(aborted.abort(), TransactionStatus::Aborted);
    assert_eq!(aborted.abort(), TransactionStatus::Aborted);
}

#[test]
fn test_rewrite_replaces_intent() {
    let store = Store::open();
    let mut txn = store.begin_default();
    txn.write("key1", "first").unwrap();
    txn.write("key1", "second").unwrap();

    let versions = store.versions("key1");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].value().as_slice(), b"second");
    assert!(!versions[0].is_committed());

    let ts = txn.commit().unwrap();
    let versions = store.versions("key1");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].commit_timestamp(), Some(ts));
    assert_eq!(versions[0].created_by(), txn.id());
}

#[test]
fn test_commit_timestamps_are_totally_ordered() {
    let store = Store::open();
    seed(&store, &[("k", "1")]);
    seed(&store, &[("k", "2")]);
    seed(&store, &[("k", "3")]);

    let stamps: Vec<_> = store
        .versions("k")
        .iter()
        .map(|v| v.commit_timestamp().unwrap())
        .collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_config_validation_and_serde() {
    assert!(matches!(
        Store::with_config(StoreConfig {
            timestamp_step: 0,
            ..StoreConfig::default()
        }),
        Err(ThothError::InvalidConfig(_))
    ));
    assert!(matches!(
        Store::with_config(StoreConfig {
            tracker_prune_interval: 0,
            ..StoreConfig::default()
        }),
        Err(ThothError::InvalidConfig(_))
    ));

    assert!(matches!(
        Store::with_config(StoreConfig {
            initial_timestamp: u64::MAX,
            ..StoreConfig::default()
        }),
        Err(ThothError::InvalidConfig(_))
    ));

    let config: StoreConfig =
        serde_json::from_str(r#"{"timestamp_step": 100, "default_isolation": "serializable"}"#)
            .unwrap();
    assert_eq!(config.timestamp_step, 100);
    assert_eq!(config.default_isolation, IsolationLevel::Serializable);
    assert_eq!(config.initial_timestamp, 0);

    let store = Store::with_config(config).unwrap();
    let txn = store.begin_default();
    assert_eq!(txn.start_timestamp(), 100);
    assert_eq!(txn.isolation_level(), IsolationLevel::Serializable);
}

#[test]
fn test_custom_oracle() {
    let oracle = std::sync::Arc::new(LocalTimestampOracle::with_initial(1_000, 10));
    let store = Store::with_oracle(StoreConfig::default(), oracle.clone()).unwrap();
    let mut txn = store.begin_default();
    assert_eq!(txn.start_timestamp(), 1_010);
    txn.write("k", "v").unwrap();
    assert_eq!(txn.commit().unwrap(), 1_020);
    assert_eq!(oracle.current(), 1_020);
}
