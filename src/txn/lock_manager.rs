//! # Lock Manager
//!
//! Tuple-level shared/exclusive locking with wait-die deadlock prevention.
//! One mutex guards the whole lock table; one condition variable parks every
//! waiter. Release broadcasts, and each waiter re-examines its queue.
//!
//! ## Queue Discipline
//!
//! Each rid owns an ordered queue of requests. A shared request is granted
//! once everything ahead of it is a granted shared request; an exclusive
//! request is granted only at the queue head. An upgrade re-enqueues the
//! caller's shared request as exclusive at the end of the current shared
//! run - ahead of any waiting exclusive requests - which is what makes the
//! read-then-write pattern deadlock-free without violating 2PL.
//!
//! ## Wait-Die
//!
//! `oldest` tracks the smallest transaction id that ever queued on the rid.
//! A younger transaction (larger id) requesting against an outstanding
//! exclusive request dies immediately: its state flips to ABORTED and the
//! call returns false. Older transactions wait. Every wait edge therefore
//! points from an older to a younger transaction and the wait-for graph is
//! acyclic. Entries whose queue empties are dropped from the table so a
//! finished transaction's id does not keep killing newcomers.
//!
//! ## Strict 2PL
//!
//! With `strict` set, `unlock` before COMMITTED/ABORTED is a protocol
//! violation: the transaction is aborted and the call returns false.
//! Otherwise the first unlock moves GROWING -> SHRINKING.

use std::collections::VecDeque;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::config::TxnId;
use crate::table::Rid;
use crate::txn::{Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct Request {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug)]
struct LockEntry {
    exclusive_count: u32,
    oldest: TxnId,
    queue: VecDeque<Request>,
}

pub struct LockManager {
    strict: bool,
    table: Mutex<HashMap<Rid, LockEntry>>,
    cv: Condvar,
}

impl LockManager {
    pub fn new(strict_two_phase_locking: bool) -> Self {
        Self {
            strict: strict_two_phase_locking,
            table: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        }
    }

    /// Acquires a shared lock on `rid`. Returns false when the transaction
    /// is (or becomes) the wait-die victim.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        debug_assert_eq!(txn.state(), TransactionState::Growing, "2PL: lock after unlock");

        match table.entry(rid) {
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    exclusive_count: 0,
                    oldest: txn.id(),
                    queue: VecDeque::from([Request {
                        txn_id: txn.id(),
                        mode: LockMode::Shared,
                        granted: false,
                    }]),
                });
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.exclusive_count > 0 && txn.id() > entry.oldest {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                entry.oldest = entry.oldest.min(txn.id());
                entry.queue.push_back(Request {
                    txn_id: txn.id(),
                    mode: LockMode::Shared,
                    granted: false,
                });
            }
        }

        // Granted once everything ahead of us is a granted shared request.
        loop {
            let entry = table.get_mut(&rid).expect("queued entry vanished");
            let mut ready = false;
            for request in entry.queue.iter() {
                if request.txn_id == txn.id() {
                    ready = true;
                    break;
                }
                if request.mode != LockMode::Shared || !request.granted {
                    break;
                }
            }
            if ready {
                for request in entry.queue.iter_mut() {
                    if request.txn_id == txn.id() {
                        request.granted = true;
                        break;
                    }
                }
                txn.add_shared_lock(rid);
                self.cv.notify_all();
                return true;
            }
            self.cv.wait(&mut table);
        }
    }

    /// Acquires an exclusive lock on `rid`. Returns false when the
    /// transaction dies under wait-die.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        debug_assert_eq!(txn.state(), TransactionState::Growing, "2PL: lock after unlock");

        match table.entry(rid) {
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    exclusive_count: 1,
                    oldest: txn.id(),
                    queue: VecDeque::from([Request {
                        txn_id: txn.id(),
                        mode: LockMode::Exclusive,
                        granted: false,
                    }]),
                });
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if txn.id() > entry.oldest {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                entry.oldest = txn.id();
                entry.exclusive_count += 1;
                entry.queue.push_back(Request {
                    txn_id: txn.id(),
                    mode: LockMode::Exclusive,
                    granted: false,
                });
            }
        }

        // Exclusive requests are granted only at the queue head.
        loop {
            let entry = table.get_mut(&rid).expect("queued entry vanished");
            if entry.queue.front().map(|r| r.txn_id) == Some(txn.id()) {
                entry.queue.front_mut().expect("nonempty").granted = true;
                txn.add_exclusive_lock(rid);
                return true;
            }
            self.cv.wait(&mut table);
        }
    }

    /// Promotes a held shared lock to exclusive. The request is re-queued
    /// at the end of the current shared run, ahead of waiting exclusive
    /// requests; it dies if any predecessor there is older.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        debug_assert_eq!(txn.state(), TransactionState::Growing, "2PL: lock after unlock");

        {
            let Some(entry) = table.get_mut(&rid) else {
                return false;
            };
            let Some(src) = entry.queue.iter().position(|r| r.txn_id == txn.id()) else {
                return false;
            };
            // First exclusive request at or after ours bounds the shared run.
            let target = entry.queue.iter().skip(src).position(|r| r.mode == LockMode::Exclusive)
                .map(|offset| src + offset)
                .unwrap_or(entry.queue.len());

            // Wait-die against everyone we would line up behind.
            if entry.queue.iter().take(target).any(|r| r.txn_id < txn.id()) {
                txn.set_state(TransactionState::Aborted);
                return false;
            }

            entry.queue.remove(src);
            entry.queue.insert(
                target - 1,
                Request {
                    txn_id: txn.id(),
                    mode: LockMode::Exclusive,
                    granted: false,
                },
            );
            entry.exclusive_count += 1;
        }

        loop {
            let entry = table.get_mut(&rid).expect("queued entry vanished");
            if entry.queue.front().map(|r| r.txn_id) == Some(txn.id()) {
                entry.queue.front_mut().expect("nonempty").granted = true;
                txn.promote_lock(rid);
                return true;
            }
            self.cv.wait(&mut table);
        }
    }

    /// Releases this transaction's lock on `rid`. Under strict 2PL an
    /// unlock before commit/abort aborts the transaction and returns false.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.table.lock();

        if self.strict {
            let state = txn.state();
            if state != TransactionState::Committed && state != TransactionState::Aborted {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if let Some(entry) = table.get_mut(&rid) {
            if let Some(position) = entry.queue.iter().position(|r| r.txn_id == txn.id()) {
                let request = entry.queue.remove(position).expect("position in range");
                if request.mode == LockMode::Exclusive {
                    entry.exclusive_count = entry.exclusive_count.saturating_sub(1);
                }
                if position == 0 || request.mode == LockMode::Exclusive {
                    self.cv.notify_all();
                }
            }
            if entry.queue.is_empty() {
                table.remove(&rid);
            }
        }
        txn.forget_lock(rid);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn shared_locks_are_compatible() {
        let locks = LockManager::new(false);
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);
        let rid = Rid::new(0, 0);

        assert!(locks.lock_shared(&t1, rid));
        assert!(locks.lock_shared(&t2, rid));
        assert!(t1.holds_shared(rid));
        assert!(t2.holds_shared(rid));
    }

    #[test]
    fn younger_exclusive_dies_on_held_exclusive() {
        let locks = LockManager::new(false);
        let older = Transaction::new(5);
        let younger = Transaction::new(10);
        let rid = Rid::new(0, 0);

        assert!(locks.lock_exclusive(&older, rid));
        assert!(!locks.lock_exclusive(&younger, rid));
        assert_eq!(younger.state(), TransactionState::Aborted);
    }

    #[test]
    fn younger_shared_dies_on_held_exclusive() {
        let locks = LockManager::new(false);
        let older = Transaction::new(3);
        let younger = Transaction::new(8);
        let rid = Rid::new(1, 1);

        assert!(locks.lock_exclusive(&older, rid));
        assert!(!locks.lock_shared(&younger, rid));
        assert_eq!(younger.state(), TransactionState::Aborted);
    }

    #[test]
    fn older_waits_for_younger_to_release() {
        let locks = Arc::new(LockManager::new(false));
        let younger = Arc::new(Transaction::new(5));
        let older = Arc::new(Transaction::new(3));
        let rid = Rid::new(0, 7);

        assert!(locks.lock_exclusive(&younger, rid));

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let locks = Arc::clone(&locks);
            let older = Arc::clone(&older);
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                assert!(locks.lock_exclusive(&older, rid));
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst), "older must block, not die");

        younger.set_state(TransactionState::Committed);
        assert!(locks.unlock(&younger, rid));
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn upgrade_succeeds_when_alone() {
        let locks = LockManager::new(false);
        let txn = Transaction::new(1);
        let rid = Rid::new(2, 2);

        assert!(locks.lock_shared(&txn, rid));
        assert!(locks.lock_upgrade(&txn, rid));
        assert!(txn.holds_exclusive(rid));
        assert!(!txn.holds_shared(rid));
    }

    #[test]
    fn upgrade_dies_behind_an_older_reader() {
        let locks = LockManager::new(false);
        let older = Transaction::new(1);
        let younger = Transaction::new(2);
        let rid = Rid::new(2, 3);

        assert!(locks.lock_shared(&older, rid));
        assert!(locks.lock_shared(&younger, rid));
        assert!(!locks.lock_upgrade(&younger, rid));
        assert_eq!(younger.state(), TransactionState::Aborted);
    }

    #[test]
    fn upgrade_waits_for_younger_reader_to_leave() {
        let locks = Arc::new(LockManager::new(false));
        let older = Arc::new(Transaction::new(1));
        let younger = Arc::new(Transaction::new(4));
        let rid = Rid::new(3, 0);

        assert!(locks.lock_shared(&older, rid));
        assert!(locks.lock_shared(&younger, rid));

        let upgraded = Arc::new(AtomicBool::new(false));
        let waiter = {
            let locks = Arc::clone(&locks);
            let older = Arc::clone(&older);
            let upgraded = Arc::clone(&upgraded);
            std::thread::spawn(move || {
                assert!(locks.lock_upgrade(&older, rid));
                upgraded.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!upgraded.load(Ordering::SeqCst));

        assert!(locks.unlock(&younger, rid));
        waiter.join().unwrap();
        assert!(older.holds_exclusive(rid));
    }

    #[test]
    fn strict_2pl_rejects_early_unlock() {
        let locks = LockManager::new(true);
        let txn = Transaction::new(1);
        let rid = Rid::new(0, 1);

        assert!(locks.lock_shared(&txn, rid));
        assert!(!locks.unlock(&txn, rid));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn strict_2pl_allows_unlock_after_commit() {
        let locks = LockManager::new(true);
        let txn = Transaction::new(1);
        let rid = Rid::new(0, 2);

        assert!(locks.lock_exclusive(&txn, rid));
        txn.set_state(TransactionState::Committed);
        assert!(locks.unlock(&txn, rid));
    }

    #[test]
    fn unlock_moves_growing_to_shrinking() {
        let locks = LockManager::new(false);
        let txn = Transaction::new(6);
        let rid = Rid::new(1, 0);

        locks.lock_shared(&txn, rid);
        assert!(locks.unlock(&txn, rid));
        assert_eq!(txn.state(), TransactionState::Shrinking);
    }

    #[test]
    fn emptied_entries_do_not_kill_newcomers() {
        let locks = LockManager::new(false);
        let rid = Rid::new(4, 4);

        let old = Transaction::new(1);
        assert!(locks.lock_exclusive(&old, rid));
        old.set_state(TransactionState::Committed);
        assert!(locks.unlock(&old, rid));

        // A much younger transaction must not die against history.
        let newcomer = Transaction::new(100);
        assert!(locks.lock_exclusive(&newcomer, rid));
    }

    #[test]
    fn aborted_transaction_cannot_lock() {
        let locks = LockManager::new(false);
        let txn = Transaction::new(9);
        txn.set_state(TransactionState::Aborted);
        assert!(!locks.lock_shared(&txn, Rid::new(0, 0)));
        assert!(!locks.lock_exclusive(&txn, Rid::new(0, 0)));
    }
}
