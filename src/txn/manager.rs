//! # Transaction Manager
//!
//! Begin / commit / abort. The manager owns nothing but the id counter and
//! handles to the log and lock managers; transactions themselves are values
//! handed to the caller.
//!
//! ## Commit Protocol
//!
//! 1. State flips to COMMITTED.
//! 2. The write set drains back-to-front; `Delete` entries apply their
//!    deferred physical removal (marked tuples become reclaimable space).
//! 3. A `COMMIT` record is appended and the call blocks until the log
//!    manager reports `persistent_lsn >= txn.prev_lsn` - force-log-at-commit
//!    is the engine's only durability point.
//! 4. Every lock in the shared and exclusive sets is released.
//!
//! ## Abort Protocol
//!
//! The write set replays back-to-front: inserts are physically deleted,
//! mark-deletes are rolled back, updates restore the pre-image. Undo runs
//! with the transaction already ABORTED, which is what stops the undo
//! itself from growing the write set. Then `ABORT` is appended, forced, and
//! locks are released.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use eyre::Result;

use crate::txn::{LockManager, Transaction, TransactionState, WriteKind};
use crate::wal::{LogManager, LogPayload, LogRecord};

pub struct TransactionManager {
    next_txn_id: AtomicI32,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(log: Arc<LogManager>, locks: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            log,
            locks,
        }
    }

    pub fn begin(&self) -> Transaction {
        let txn = Transaction::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        if self.log.is_enabled() {
            let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Begin);
            let lsn = self.log.append(&mut record);
            txn.set_prev_lsn(lsn);
        }
        txn
    }

    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Committed);

        // Deferred physical deletes, newest first.
        while let Some(record) = txn.pop_write() {
            if record.kind == WriteKind::Delete {
                record.table.apply_delete(record.rid, txn)?;
            }
        }

        if self.log.is_enabled() {
            let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Commit);
            let lsn = self.log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.log.wait_for_flush(lsn)?;
        }

        self.release_locks(txn);
        Ok(())
    }

    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Aborted);

        // Undo in reverse program order.
        while let Some(record) = txn.pop_write() {
            match record.kind {
                WriteKind::Insert => record.table.apply_delete(record.rid, txn)?,
                WriteKind::Delete => record.table.rollback_delete(record.rid, txn)?,
                WriteKind::Update => {
                    // Same-size pre-image; restoring it cannot run out of
                    // space, so a false return here is unreachable.
                    record.table.update_tuple(&record.tuple, record.rid, txn)?;
                }
            }
        }

        if self.log.is_enabled() {
            let mut record = LogRecord::new(txn.id(), txn.prev_lsn(), LogPayload::Abort);
            let lsn = self.log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.log.wait_for_flush(lsn)?;
        }

        self.release_locks(txn);
        Ok(())
    }

    fn release_locks(&self, txn: &Transaction) {
        for rid in txn.locked_rids() {
            self.locks.unlock(txn, rid);
        }
    }
}
