//! # Transaction Durability and Rollback Tests
//!
//! Force-log-at-commit, write-set undo on abort, and persistence across
//! engine restarts with logging enabled.

use stratadb::{EngineOptions, StorageEngine, TransactionState, Tuple};
use tempfile::tempdir;

fn logging_engine() -> (tempfile::TempDir, StorageEngine) {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::open(
        dir.path().join("test.db"),
        EngineOptions {
            enable_logging: true,
            ..Default::default()
        },
    )
    .unwrap();
    (dir, engine)
}

fn rows(engine: &StorageEngine, table: &stratadb::TableHeap) -> Vec<Vec<u8>> {
    let txn = engine.begin();
    let collected = table
        .iter(&txn)
        .unwrap()
        .map(|t| t.unwrap().data().to_vec())
        .collect();
    engine.commit(&txn).unwrap();
    collected
}

#[test]
fn commit_waits_for_the_log() {
    let (_dir, engine) = logging_engine();
    let txn = engine.begin();
    let table = engine.create_table("t", &txn).unwrap();

    for i in 0..100u8 {
        table
            .insert_tuple(&Tuple::new(vec![i; 32]), &txn)
            .unwrap()
            .unwrap();
    }
    engine.commit(&txn).unwrap();

    // Force-log-at-commit: every record of this transaction is durable.
    assert!(engine.log_manager().persistent_lsn() >= txn.prev_lsn());
    assert!(engine.disk().num_flushes() >= 1);
}

#[test]
fn commit_of_a_read_only_transaction_is_cheap() {
    let (_dir, engine) = logging_engine();
    let txn = engine.begin();
    assert_eq!(txn.write_set_len(), 0);
    engine.commit(&txn).unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert!(engine.log_manager().persistent_lsn() >= txn.prev_lsn());
}

#[test]
fn abort_rolls_back_inserts_and_updates() {
    let (_dir, engine) = logging_engine();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    engine.commit(&setup).unwrap();

    let txn = engine.begin();
    let a = table
        .insert_tuple(&Tuple::new(b"tuple-a-v1".to_vec()), &txn)
        .unwrap()
        .unwrap();
    table
        .insert_tuple(&Tuple::new(b"tuple-b-v1".to_vec()), &txn)
        .unwrap()
        .unwrap();
    assert!(table
        .update_tuple(&Tuple::new(b"tuple-a-v2".to_vec()), a, &txn)
        .unwrap());
    engine.abort(&txn).unwrap();
    assert_eq!(txn.state(), TransactionState::Aborted);

    // Neither tuple survives, in either version.
    assert!(rows(&engine, &table).is_empty());
}

#[test]
fn abort_restores_a_marked_delete() {
    let (_dir, engine) = logging_engine();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let rid = table
        .insert_tuple(&Tuple::new(b"keeper".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    let txn = engine.begin();
    assert!(table.mark_delete(rid, &txn).unwrap());
    engine.abort(&txn).unwrap();

    assert_eq!(rows(&engine, &table), vec![b"keeper".to_vec()]);
}

#[test]
fn commit_applies_marked_deletes() {
    let (_dir, engine) = logging_engine();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let doomed = table
        .insert_tuple(&Tuple::new(b"doomed".to_vec()), &setup)
        .unwrap()
        .unwrap();
    table
        .insert_tuple(&Tuple::new(b"kept".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    let txn = engine.begin();
    assert!(table.mark_delete(doomed, &txn).unwrap());
    engine.commit(&txn).unwrap();

    assert_eq!(rows(&engine, &table), vec![b"kept".to_vec()]);
}

#[test]
fn update_rollback_restores_the_pre_image() {
    let (_dir, engine) = logging_engine();

    let setup = engine.begin();
    let table = engine.create_table("t", &setup).unwrap();
    let rid = table
        .insert_tuple(&Tuple::new(b"original".to_vec()), &setup)
        .unwrap()
        .unwrap();
    engine.commit(&setup).unwrap();

    let txn = engine.begin();
    assert!(table
        .update_tuple(&Tuple::new(b"replaced".to_vec()), rid, &txn)
        .unwrap());
    engine.abort(&txn).unwrap();

    assert_eq!(rows(&engine, &table), vec![b"original".to_vec()]);
}

#[test]
fn oversized_tuple_aborts_the_transaction() {
    let (_dir, engine) = logging_engine();
    let txn = engine.begin();
    let table = engine.create_table("t", &txn).unwrap();

    let oversized = Tuple::new(vec![0u8; stratadb::config::PAGE_SIZE - 16]);
    assert!(table.insert_tuple(&oversized, &txn).unwrap().is_none());
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn committed_data_and_index_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let options = EngineOptions {
        enable_logging: true,
        ..Default::default()
    };

    let mut rids = Vec::new();
    {
        let engine = StorageEngine::open(&path, options.clone()).unwrap();
        let txn = engine.begin();
        let table = engine.create_table("events", &txn).unwrap();
        let index = engine.create_index::<i64>("events_pk", 8).unwrap();

        for key in 0..64i64 {
            let payload = format!("event-{:03}", key).into_bytes();
            let rid = table
                .insert_tuple(&Tuple::new(payload), &txn)
                .unwrap()
                .unwrap();
            assert!(index.insert(key, rid, &txn).unwrap());
            rids.push(rid);
        }
        engine.commit(&txn).unwrap();
    }

    let engine = StorageEngine::open(&path, options).unwrap();
    let table = engine.open_table("events").unwrap();
    let index = engine.open_index::<i64>("events_pk", 8).unwrap();

    let txn = engine.begin();
    for key in 0..64i64 {
        let rid = index.get_value(&key).unwrap().expect("index entry survives");
        assert_eq!(rid, rids[key as usize]);
        let tuple = table.get_tuple(rid, &txn).unwrap().expect("tuple survives");
        assert_eq!(tuple.data(), format!("event-{:03}", key).as_bytes());
    }
    engine.commit(&txn).unwrap();
}

#[test]
fn per_transaction_log_records_chain_in_program_order() {
    let (_dir, engine) = logging_engine();
    let txn = engine.begin();
    let begin_lsn = txn.prev_lsn();
    assert!(begin_lsn >= 0);

    let table = engine.create_table("t", &txn).unwrap();
    let after_create = txn.prev_lsn();
    assert!(after_create > begin_lsn, "NEWPAGE record advances the chain");

    table
        .insert_tuple(&Tuple::new(b"x".to_vec()), &txn)
        .unwrap()
        .unwrap();
    assert!(txn.prev_lsn() > after_create, "INSERT record advances the chain");

    engine.commit(&txn).unwrap();
}
