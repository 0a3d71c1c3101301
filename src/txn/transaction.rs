//! # Transactions
//!
//! A [`Transaction`] is a value threaded through every mutating call. Its
//! state is an atomic so any thread may abort a transaction it can see
//! (wait-die does exactly that from inside the lock manager); the other
//! fields sit behind small mutexes because they are only touched by the
//! owning thread and the lock manager, never on hot paths.
//!
//! ## State Machine
//!
//! ```text
//!     ┌──────────────────────────┐
//!     │                          v
//! GROWING ──> SHRINKING ──> COMMITTED    ABORTED
//!     │            │                        ^
//!     └────────────┴────────────────────────┘
//! ```
//!
//! Under strict two-phase locking the SHRINKING state is never entered:
//! unlocks before COMMITTED/ABORTED abort the transaction instead.
//!
//! ## Write Set
//!
//! Every successful heap mutation appends a [`WriteRecord`] carrying what
//! is needed to undo it: the rid, the kind, the old image (updates only)
//! and a handle to the owning table heap. Commit drains the set to apply
//! deferred physical deletes; abort replays it back-to-front.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use hashbrown::HashSet;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::config::{Lsn, PageId, TxnId, INVALID_LSN};
use crate::table::{Rid, TableHeap, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Growing = 0,
    Shrinking = 1,
    Committed = 2,
    Aborted = 3,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Growing,
            1 => TransactionState::Shrinking,
            2 => TransactionState::Committed,
            _ => TransactionState::Aborted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Delete,
    Update,
}

/// One undo entry. `tuple` holds the pre-update image for `Update` records
/// and is empty otherwise.
pub struct WriteRecord {
    pub rid: Rid,
    pub kind: WriteKind,
    pub tuple: Tuple,
    pub table: TableHeap,
}

impl std::fmt::Debug for WriteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRecord")
            .field("rid", &self.rid)
            .field("kind", &self.kind)
            .finish()
    }
}

pub struct Transaction {
    id: TxnId,
    state: AtomicU8,
    prev_lsn: AtomicI32,
    write_set: Mutex<SmallVec<[WriteRecord; 8]>>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    deleted_page_set: Mutex<HashSet<PageId>>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: AtomicU8::new(TransactionState::Growing as u8),
            prev_lsn: AtomicI32::new(INVALID_LSN),
            write_set: Mutex::new(SmallVec::new()),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            deleted_page_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// May be called from any thread; waiters in the lock manager observe
    /// the new state only after a broadcast wakes them.
    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn push_write(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    pub fn pop_write(&self) -> Option<WriteRecord> {
        self.write_set.lock().pop()
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.lock().len()
    }

    pub fn holds_shared(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn holds_exclusive(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn promote_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn forget_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Every rid this transaction holds any lock on.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    pub fn add_deleted_page(&self, page_id: PageId) {
        self.deleted_page_set.lock().insert(page_id);
    }

    pub fn take_deleted_pages(&self) -> Vec<PageId> {
        self.deleted_page_set.lock().drain().collect()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("prev_lsn", &self.prev_lsn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transaction_is_growing() {
        let txn = Transaction::new(1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert_eq!(txn.write_set_len(), 0);
    }

    #[test]
    fn state_is_visible_across_threads() {
        let txn = std::sync::Arc::new(Transaction::new(2));
        let peer = std::sync::Arc::clone(&txn);
        std::thread::spawn(move || peer.set_state(TransactionState::Aborted))
            .join()
            .unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn lock_sets_track_promotion() {
        let txn = Transaction::new(3);
        let rid = Rid::new(1, 4);

        txn.add_shared_lock(rid);
        assert!(txn.holds_shared(rid));
        assert!(!txn.holds_exclusive(rid));

        txn.promote_lock(rid);
        assert!(!txn.holds_shared(rid));
        assert!(txn.holds_exclusive(rid));

        txn.forget_lock(rid);
        assert!(txn.locked_rids().is_empty());
    }

    #[test]
    fn deleted_pages_drain_once() {
        let txn = Transaction::new(4);
        txn.add_deleted_page(9);
        txn.add_deleted_page(9);
        txn.add_deleted_page(11);

        let mut pages = txn.take_deleted_pages();
        pages.sort_unstable();
        assert_eq!(pages, vec![9, 11]);
        assert!(txn.take_deleted_pages().is_empty());
    }
}
