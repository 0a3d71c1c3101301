//! # Lock Contention Tests
//!
//! Wait-die ordering observed through the table heap: younger transactions
//! die against a held exclusive lock, older ones block until release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratadb::{EngineOptions, StorageEngine, TransactionState, Tuple};
use tempfile::tempdir;

#[test]
fn younger_writer_dies_older_writer_waits() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(
        StorageEngine::open(
            dir.path().join("test.db"),
            EngineOptions {
                enable_logging: true,
                ..Default::default()
            },
        )
        .unwrap(),
    );

    // Committed row everyone fights over.
    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let rid = table
        .insert_tuple(&Tuple::new(b"contended".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    let older = Arc::new(engine.begin());
    let holder = engine.begin();
    let younger = engine.begin();
    assert!(older.id() < holder.id() && holder.id() < younger.id());

    // The middle transaction takes the exclusive lock first.
    assert!(table
        .update_tuple(&Tuple::new(b"by-holder!".to_vec()), rid, &holder)
        .unwrap());

    // A younger transaction requesting the same lock dies immediately.
    assert!(!table
        .update_tuple(&Tuple::new(b"by-younger".to_vec()), rid, &younger)
        .unwrap());
    assert_eq!(younger.state(), TransactionState::Aborted);
    engine.abort(&younger).unwrap();

    // An older transaction blocks instead, then proceeds after release.
    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let engine = Arc::clone(&engine);
        let table = table.clone();
        let older = Arc::clone(&older);
        let acquired = Arc::clone(&acquired);
        std::thread::spawn(move || {
            assert!(table
                .update_tuple(&Tuple::new(b"by-older!!".to_vec()), rid, &older)
                .unwrap());
            acquired.store(true, Ordering::SeqCst);
            engine.commit(&older).unwrap();
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(
        !acquired.load(Ordering::SeqCst),
        "older transaction must wait, not die"
    );

    engine.commit(&holder).unwrap();
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));

    // The older transaction's write won the final state.
    let check = engine.begin();
    let tuple = table.get_tuple(rid, &check).unwrap().unwrap();
    assert_eq!(tuple.data(), b"by-older!!");
    engine.commit(&check).unwrap();
}

#[test]
fn reader_then_writer_upgrades_without_deadlock() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::open(
        dir.path().join("test.db"),
        EngineOptions {
            enable_logging: true,
            ..Default::default()
        },
    )
    .unwrap();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let rid = table
        .insert_tuple(&Tuple::new(b"row".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    // Read-then-write inside one transaction: the shared lock upgrades
    // rather than self-deadlocking.
    let txn = engine.begin();
    assert!(table.get_tuple(rid, &txn).unwrap().is_some());
    assert!(txn.holds_shared(rid));
    assert!(table
        .update_tuple(&Tuple::new(b"new".to_vec()), rid, &txn)
        .unwrap());
    assert!(txn.holds_exclusive(rid));
    engine.commit(&txn).unwrap();
}

#[test]
fn strict_two_phase_locking_holds_locks_to_commit() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::open(
        dir.path().join("test.db"),
        EngineOptions {
            enable_logging: true,
            strict_two_phase_locking: true,
            ..Default::default()
        },
    )
    .unwrap();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let rid = table
        .insert_tuple(&Tuple::new(b"row".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    let txn = engine.begin();
    assert!(table.get_tuple(rid, &txn).unwrap().is_some());
    // Early release is a protocol violation under strict 2PL.
    assert!(!engine.lock_manager().unlock(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Aborted);
    engine.abort(&txn).unwrap();

    // Release at commit time is fine.
    let txn2 = engine.begin();
    assert!(table.get_tuple(rid, &txn2).unwrap().is_some());
    engine.commit(&txn2).unwrap();
    assert_eq!(txn2.state(), TransactionState::Committed);
}

#[test]
fn aborted_transaction_undo_releases_its_locks() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::open(
        dir.path().join("test.db"),
        EngineOptions {
            enable_logging: true,
            ..Default::default()
        },
    )
    .unwrap();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let rid = table
        .insert_tuple(&Tuple::new(b"row".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    let loser = engine.begin();
    assert!(table
        .update_tuple(&Tuple::new(b"tmp".to_vec()), rid, &loser)
        .unwrap());
    engine.abort(&loser).unwrap();

    // A later transaction is not blocked by the aborted one's locks.
    let winner = engine.begin();
    assert!(table
        .update_tuple(&Tuple::new(b"won".to_vec()), rid, &winner)
        .unwrap());
    engine.commit(&winner).unwrap();

    let check = engine.begin();
    assert_eq!(table.get_tuple(rid, &check).unwrap().unwrap().data(), b"won");
    engine.commit(&check).unwrap();
}
