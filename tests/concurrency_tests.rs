// Declare the common module *within this test crate*
mod common;

use rand::Rng;
use std::sync::{Arc, Barrier};
use std::thread;

use thoth::prelude::*;

use common::{read_i64, read_str, seed, setup_store};

#[test]
fn test_serializable_rw_conflict_interleaved() {
    // Test Scenario: stale read under Serializable isolation using threads
    // 1. Initial: Write key1 = initial
    // 2. Tx1 (Thread 1): Start, Read key1, Write key2, Wait(B1), Wait(B2), Commit
    // 3. Tx2 (Thread 2): Wait(B1), Start, Write key1, Commit, Signal(B2)
    // Expected: Tx1 reads initial. Tx2 commits. Tx1 commit fails (its read of key1 is stale).
    let store = setup_store(IsolationLevel::Serializable);
    seed(&store, &[("key1", "initial")]);

    let barrier = Arc::new(Barrier::new(2));

    let barrier_tx1 = barrier.clone();
    let store_tx1 = store.clone();
    let handle1 = thread::spawn(move || {
        let mut txn1 = store_tx1.begin_default();
        assert_eq!(read_str(&mut txn1, "key1").as_deref(), Some("initial"));
        txn1.write("key2", "from_tx1").unwrap();

        // Wait for Tx2 to start, then for it to commit
        barrier_tx1.wait();
        barrier_tx1.wait();

        let commit_result = txn1.commit();
        match commit_result {
            Err(ThothError::StaleReadConflict { key, .. }) => assert_eq!(key, "key1"),
            other => panic!("Tx1 finished with unexpected outcome: {:?}", other),
        }
    });

    let barrier_tx2 = barrier.clone();
    let store_tx2 = store.clone();
    let handle2 = thread::spawn(move || {
        barrier_tx2.wait();
        let mut txn2 = store_tx2.begin_default();
        txn2.write("key1", "updated_by_tx2").unwrap();
        let commit_result = txn2.commit();
        // Signal Tx1 before asserting so a failure cannot deadlock the barrier.
        barrier_tx2.wait();
        assert!(commit_result.is_ok(), "Tx2 commit failed: {:?}", commit_result);
    });

    handle1.join().expect("Thread 1 panicked");
    handle2.join().expect("Thread 2 panicked");

    let mut final_read = store.begin_default();
    assert_eq!(read_str(&mut final_read, "key1").as_deref(), Some("updated_by_tx2"));
    assert_eq!(read_str(&mut final_read, "key2"), None);
}

#[test]
fn test_serializable_ww_conflict_interleaved() {
    // Tx1 writes first and commits first; Tx2 started before that commit and loses.
    let store = setup_store(IsolationLevel::Serializable);
    let barrier = Arc::new(Barrier::new(2));

    let barrier_tx1 = barrier.clone();
    let store_tx1 = store.clone();
    let handle1 = thread::spawn(move || {
        let mut txn1 = store_tx1.begin_default();
        txn1.write("key1_ww", "tx1").unwrap();
        barrier_tx1.wait(); // B1: both started
        let result = txn1.commit();
        barrier_tx1.wait(); // B2: Tx1 committed
        result
    });

    let barrier_tx2 = barrier.clone();
    let store_tx2 = store.clone();
    let handle2 = thread::spawn(move || {
        let mut txn2 = store_tx2.begin_default();
        txn2.write("key1_ww", "tx2").unwrap();
        barrier_tx2.wait();
        barrier_tx2.wait();
        txn2.commit()
    });

    let tx1_result = handle1.join().expect("Thread 1 panicked");
    let tx2_result = handle2.join().expect("Thread 2 panicked");
    let committed_at = tx1_result.expect("Tx1 should commit");
    assert_eq!(
        tx2_result,
        Err(ThothError::WriteWriteConflict {
            key: "key1_ww".to_string(),
            committed_at
        })
    );
}

#[test]
fn test_serializable_dangerous_structure_rejects_pivot() {
    // T1 reads k1; T2 writes k1 and reads k2; T3 writes k2.
    // Edges T1 -> T2 -> T3 make T2 the pivot; commit order T1, T2, T3.
    let store = setup_store(IsolationLevel::Serializable);
    seed(&store, &[("k1", "a"), ("k2", "b")]);

    let mut t1 = store.begin_default();
    let mut t2 = store.begin_default();
    let mut t3 = store.begin_default();

    assert_eq!(read_str(&mut t1, "k1").as_deref(), Some("a"));
    t2.write("k1", "from_t2").unwrap();
    assert_eq!(read_str(&mut t2, "k2").as_deref(), Some("b"));
    t3.write("k2", "from_t3").unwrap();

    assert!(t1.rw_conflicts().outgoing);
    assert!(t2.rw_conflicts().is_pivot());
    assert!(t3.rw_conflicts().incoming);

    t1.commit().expect("T1 has no incoming edge");
    assert_eq!(
        t2.commit(),
        Err(ThothError::DangerousStructure { id: t2.id() })
    );
    t3.commit().expect("T3 loses its edge once T2 aborts");

    let mut reader = store.begin_default();
    assert_eq!(read_str(&mut reader, "k1").as_deref(), Some("a"));
    assert_eq!(read_str(&mut reader, "k2").as_deref(), Some("from_t3"));
}

#[test]
fn test_serializable_prevents_write_skew() {
    // Classic on-call example: both doctors read both shifts and each takes one off.
    let store = setup_store(IsolationLevel::Serializable);
    seed(&store, &[("alice", "on"), ("bob", "on")]);

    let mut t1 = store.begin_default();
    let mut t2 = store.begin_default();
    read_str(&mut t1, "alice");
    read_str(&mut t1, "bob");
    read_str(&mut t2, "alice");
    read_str(&mut t2, "bob");

    t1.write("alice", "off").unwrap();
    // The second write closes the cycle and makes T2 a pivot right away.
    let err = t2.write("bob", "off").unwrap_err();
    assert_eq!(err, ThothError::DangerousStructure { id: t2.id() });
    assert_eq!(t2.status(), TransactionStatus::Aborted);

    t1.commit().unwrap();
    let mut reader = store.begin_default();
    assert_eq!(read_str(&mut reader, "bob").as_deref(), Some("on"));
}

#[test]
fn test_snapshot_write_skew_is_caught_by_stale_reads() {
    let store = setup_store(IsolationLevel::Snapshot);
    seed(&store, &[("alice", "on"), ("bob", "on")]);

    let mut t1 = store.begin_default();
    let mut t2 = store.begin_default();
    for key in ["alice", "bob"] {
        read_str(&mut t1, key);
        read_str(&mut t2, key);
    }
    t1.write("alice", "off").unwrap();
    t2.write("bob", "off").unwrap();

    t1.commit().unwrap();
    assert!(matches!(
        t2.commit(),
        Err(ThothError::StaleReadConflict { .. })
    ));
}

#[test]
fn test_tracker_is_pruned_once_transactions_finish() {
    let store = Store::with_config(StoreConfig {
        default_isolation: IsolationLevel::Serializable,
        tracker_prune_interval: 1,
        ..StoreConfig::default()
    })
    .unwrap();

    for i in 0..10 {
        let mut txn = store.begin_default();
        read_str(&mut txn, "counter");
        txn.write("counter", i.to_string()).unwrap();
        txn.commit().unwrap();
    }
    assert_eq!(store.tracked_transactions(), 0);
}

/// Moves random amounts between accounts from several threads, retrying on conflicts.
fn run_bank_transfers(isolation: IsolationLevel) {
    const ACCOUNTS: usize = 5;
    const INITIAL: i64 = 100;
    const THREADS: usize = 4;
    const TRANSFERS_PER_THREAD: usize = 50;

    let store = setup_store(isolation);
    let accounts: Vec<String> = (0..ACCOUNTS).map(|i| format!("account_{}", i)).collect();
    {
        let mut setup = store.begin_default();
        for account in &accounts {
            setup.write(account.as_str(), INITIAL.to_string()).unwrap();
        }
        setup.commit().unwrap();
    }

    let accounts = Arc::new(accounts);
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            let accounts = Arc::clone(&accounts);
            thread::spawn(move || {
                let mut rng = rand::rng();
                let mut retries = 0usize;
                for _ in 0..TRANSFERS_PER_THREAD {
                    let from = rng.random_range(0..ACCOUNTS);
                    let to = (from + rng.random_range(1..ACCOUNTS)) % ACCOUNTS;
                    let amount = rng.random_range(1..=20);
                    loop {
                        match transfer(&store, &accounts[from], &accounts[to], amount) {
                            Ok(()) => break,
                            Err(err) if err.is_retryable() => retries += 1,
                            Err(err) => panic!("unexpected transfer error: {}", err),
                        }
                    }
                }
                retries
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("transfer thread panicked");
    }

    let mut audit = store.begin_default();
    let total: i64 = accounts
        .iter()
        .map(|account| read_i64(&mut audit, account).unwrap())
        .sum();
    assert_eq!(total, INITIAL * ACCOUNTS as i64);
    assert!(store.active_transactions().len() == 1, "only the audit is running");
}

fn transfer(store: &Store, from: &str, to: &str, amount: i64) -> thoth::Result<()> {
    let mut txn = store.begin_default();
    let from_balance = read_i64(&mut txn, from)?;
    let to_balance = read_i64(&mut txn, to)?;
    txn.write(from, (from_balance - amount).to_string())?;
    txn.write(to, (to_balance + amount).to_string())?;
    txn.commit()?;
    Ok(())
}

#[test]
fn test_concurrent_transfers_preserve_total_under_snapshot() {
    run_bank_transfers(IsolationLevel::Snapshot);
}

#[test]
fn test_concurrent_transfers_preserve_total_under_serializable() {
    run_bank_transfers(IsolationLevel::Serializable);
}
