//! # Slotted Table Page
//!
//! Tuple storage within one 4KB page. The header is followed by a slot
//! directory growing forward and tuple bodies growing backward:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  --------------
//! 0       4     page_id
//! 4       4     lsn
//! 8       4     prev_page_id
//! 12      4     next_page_id
//! 16      4     free_space_ptr   (start of the tuple body region)
//! 20      4     tuple_count
//! 24      8*n   slot directory: (offset: i32, size: i32) per slot
//! ...           free space
//! fsp..   ...   tuple bodies, packed against the page end
//! ```
//!
//! A slot's `size` encodes three states: positive = live tuple, negative =
//! marked deleted (reserved against reuse until the owning transaction
//! resolves), zero = tombstone available for reuse. Free space is
//! `free_space_ptr - 24 - 8 * tuple_count`.
//!
//! ## Compaction
//!
//! `apply_delete` and shrinking/growing `update`s shift every tuple body
//! between `free_space_ptr` and the affected tuple up or down and rewrite
//! the slot offsets that moved. Slots themselves are never renumbered, so
//! rids stay stable across compaction.
//!
//! ## Locking and Logging
//!
//! When logging is enabled, every mutation acquires the tuple's exclusive
//! lock through the lock manager (upgrading a held shared lock), appends
//! its log record and stamps the record's LSN on the page - all before the
//! caller releases the page latch, so log order equals physical order.

use eyre::{ensure, Result};

use crate::config::{
    Lsn, PageId, INVALID_PAGE_ID, PAGE_SIZE, SLOT_ENTRY_SIZE, TABLE_PAGE_HEADER_SIZE,
};
use crate::storage::{read_i32, write_i32};
use crate::table::{Rid, Tuple};
use crate::txn::{LockManager, Transaction, TransactionState};
use crate::wal::{LogManager, LogPayload, LogRecord};

const PREV_PAGE_OFFSET: usize = 8;
const NEXT_PAGE_OFFSET: usize = 12;
const FREE_SPACE_OFFSET: usize = 16;
const TUPLE_COUNT_OFFSET: usize = 20;

fn slot_offset_pos(slot: usize) -> usize {
    TABLE_PAGE_HEADER_SIZE + SLOT_ENTRY_SIZE * slot
}

fn slot_size_pos(slot: usize) -> usize {
    TABLE_PAGE_HEADER_SIZE + SLOT_ENTRY_SIZE * slot + 4
}

/// Read-only view over a table page's bytes (held under the frame's read
/// latch).
pub struct TablePage<'a> {
    data: &'a [u8],
}

impl<'a> TablePage<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        read_i32(self.data, 0)
    }

    pub fn lsn(&self) -> Lsn {
        read_i32(self.data, 4)
    }

    pub fn prev_page_id(&self) -> PageId {
        read_i32(self.data, PREV_PAGE_OFFSET)
    }

    pub fn next_page_id(&self) -> PageId {
        read_i32(self.data, NEXT_PAGE_OFFSET)
    }

    pub fn free_space_ptr(&self) -> i32 {
        read_i32(self.data, FREE_SPACE_OFFSET)
    }

    pub fn tuple_count(&self) -> i32 {
        read_i32(self.data, TUPLE_COUNT_OFFSET)
    }

    pub fn slot_offset(&self, slot: usize) -> i32 {
        read_i32(self.data, slot_offset_pos(slot))
    }

    pub fn slot_size(&self, slot: usize) -> i32 {
        read_i32(self.data, slot_size_pos(slot))
    }

    pub fn free_space(&self) -> i32 {
        self.free_space_ptr()
            - TABLE_PAGE_HEADER_SIZE as i32
            - SLOT_ENTRY_SIZE as i32 * self.tuple_count()
    }

    /// Copies out the tuple at `rid`, acquiring a shared lock when logging
    /// is enabled and the transaction holds neither lock already. Returns
    /// `None` for out-of-range or deleted slots (aborting the transaction
    /// under logging) and for lock denial.
    pub fn get(
        &self,
        rid: Rid,
        txn: &Transaction,
        locks: &LockManager,
        log: &LogManager,
    ) -> Result<Option<Tuple>> {
        let slot = rid.slot();
        if slot < 0 || slot >= self.tuple_count() {
            if log.is_enabled() {
                txn.set_state(TransactionState::Aborted);
            }
            return Ok(None);
        }
        let size = self.slot_size(slot as usize);
        if size <= 0 {
            if log.is_enabled() {
                txn.set_state(TransactionState::Aborted);
            }
            return Ok(None);
        }

        if log.is_enabled()
            && !txn.holds_exclusive(rid)
            && !txn.holds_shared(rid)
            && !locks.lock_shared(txn, rid)
        {
            return Ok(None);
        }

        let offset = self.slot_offset(slot as usize) as usize;
        let bytes = self.data[offset..offset + size as usize].to_vec();
        Ok(Some(Tuple::with_rid(rid, bytes)))
    }

    /// First live tuple on the page, in slot order.
    pub fn first_tuple_rid(&self) -> Option<Rid> {
        (0..self.tuple_count() as usize)
            .find(|&slot| self.slot_size(slot) > 0)
            .map(|slot| Rid::new(self.page_id(), slot as i32))
    }

    /// Next live tuple after `current` on this page.
    pub fn next_tuple_rid(&self, current: Rid) -> Option<Rid> {
        debug_assert_eq!(current.page_id(), self.page_id());
        ((current.slot() + 1) as usize..self.tuple_count() as usize)
            .find(|&slot| self.slot_size(slot) > 0)
            .map(|slot| Rid::new(self.page_id(), slot as i32))
    }
}

/// Mutable view over a table page's bytes (held under the frame's write
/// latch).
pub struct TablePageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    fn view(&self) -> TablePage<'_> {
        TablePage::new(self.data)
    }

    pub fn page_id(&self) -> PageId {
        self.view().page_id()
    }

    pub fn next_page_id(&self) -> PageId {
        self.view().next_page_id()
    }

    pub fn free_space(&self) -> i32 {
        self.view().free_space()
    }

    pub fn tuple_count(&self) -> i32 {
        self.view().tuple_count()
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        write_i32(self.data, 4, lsn);
    }

    pub fn set_prev_page_id(&mut self, page_id: PageId) {
        write_i32(self.data, PREV_PAGE_OFFSET, page_id);
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        write_i32(self.data, NEXT_PAGE_OFFSET, page_id);
    }

    fn set_free_space_ptr(&mut self, value: i32) {
        write_i32(self.data, FREE_SPACE_OFFSET, value);
    }

    fn set_tuple_count(&mut self, value: i32) {
        write_i32(self.data, TUPLE_COUNT_OFFSET, value);
    }

    fn set_slot(&mut self, slot: usize, offset: i32, size: i32) {
        write_i32(self.data, slot_offset_pos(slot), offset);
        write_i32(self.data, slot_size_pos(slot), size);
    }

    fn set_slot_size(&mut self, slot: usize, size: i32) {
        write_i32(self.data, slot_size_pos(slot), size);
    }

    fn set_slot_offset(&mut self, slot: usize, offset: i32) {
        write_i32(self.data, slot_offset_pos(slot), offset);
    }

    /// Initializes a fresh table page, emitting a `NEWPAGE` record carrying
    /// the predecessor's id.
    pub fn init(
        &mut self,
        page_id: PageId,
        prev_page_id: PageId,
        log: &LogManager,
        txn: &Transaction,
    ) {
        write_i32(self.data, 0, page_id);
        if log.is_enabled() {
            let mut record = LogRecord::new(
                txn.id(),
                txn.prev_lsn(),
                LogPayload::NewPage { prev_page_id },
            );
            let lsn = log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.set_lsn(lsn);
        }
        self.set_prev_page_id(prev_page_id);
        self.set_next_page_id(INVALID_PAGE_ID);
        self.set_free_space_ptr(PAGE_SIZE as i32);
        self.set_tuple_count(0);
    }

    /// Inserts `tuple`, reusing a tombstone slot when one exists. Returns
    /// the new rid, or `None` when the page cannot fit the tuple (callers
    /// move on to the next page).
    pub fn insert(
        &mut self,
        tuple: &Tuple,
        txn: &Transaction,
        locks: &LockManager,
        log: &LogManager,
    ) -> Result<Option<Rid>> {
        let size = tuple.size() as i32;
        ensure!(size > 0, "cannot insert an empty tuple");
        if self.free_space() < size {
            return Ok(None);
        }

        let count = self.tuple_count();
        let mut slot = count as usize;
        for candidate in 0..count as usize {
            if self.view().slot_size(candidate) == 0 {
                debug_assert!(
                    !txn.holds_shared(Rid::new(self.page_id(), candidate as i32))
                        && !txn.holds_exclusive(Rid::new(self.page_id(), candidate as i32)),
                    "reused slot is still locked by the inserting transaction"
                );
                slot = candidate;
                break;
            }
        }

        // A brand-new slot needs room for its directory entry as well.
        if slot == count as usize && self.free_space() < size + SLOT_ENTRY_SIZE as i32 {
            return Ok(None);
        }

        let offset = self.view().free_space_ptr() - size;
        self.set_free_space_ptr(offset);
        self.data[offset as usize..(offset + size) as usize].copy_from_slice(tuple.data());
        self.set_slot(slot, offset, size);
        if slot == count as usize {
            self.set_tuple_count(count + 1);
        }

        let rid = Rid::new(self.page_id(), slot as i32);
        if log.is_enabled() {
            ensure!(
                locks.lock_exclusive(txn, rid),
                "transaction {} failed to lock its own freshly inserted tuple {:?}",
                txn.id(),
                rid
            );
            let mut record = LogRecord::new(
                txn.id(),
                txn.prev_lsn(),
                LogPayload::Insert {
                    rid,
                    tuple: tuple.data().to_vec(),
                },
            );
            let lsn = log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.set_lsn(lsn);
        }
        Ok(Some(rid))
    }

    /// Flips the slot size negative so the tuple is invisible but the slot
    /// stays reserved for this transaction's rollback.
    pub fn mark_delete(
        &mut self,
        rid: Rid,
        txn: &Transaction,
        locks: &LockManager,
        log: &LogManager,
    ) -> Result<bool> {
        let slot = rid.slot();
        if slot < 0 || slot >= self.tuple_count() {
            if log.is_enabled() {
                txn.set_state(TransactionState::Aborted);
            }
            return Ok(false);
        }
        let size = self.view().slot_size(slot as usize);
        if size <= 0 {
            if log.is_enabled() {
                txn.set_state(TransactionState::Aborted);
            }
            return Ok(false);
        }

        if log.is_enabled() {
            if txn.holds_shared(rid) {
                if !locks.lock_upgrade(txn, rid) {
                    return Ok(false);
                }
            } else if !txn.holds_exclusive(rid) && !locks.lock_exclusive(txn, rid) {
                return Ok(false);
            }

            let offset = self.view().slot_offset(slot as usize) as usize;
            let tuple = self.data[offset..offset + size as usize].to_vec();
            let mut record = LogRecord::new(
                txn.id(),
                txn.prev_lsn(),
                LogPayload::MarkDelete { rid, tuple },
            );
            let lsn = log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.set_lsn(lsn);
        }

        self.set_slot_size(slot as usize, -size);
        Ok(true)
    }

    /// Rewrites the tuple in place, compacting neighbors to absorb the size
    /// difference. Returns the old image on success; `None` when the delta
    /// does not fit (callers fall back to delete + insert) or when the slot
    /// is unusable (which also aborts the transaction under logging).
    pub fn update(
        &mut self,
        new_tuple: &Tuple,
        rid: Rid,
        txn: &Transaction,
        locks: &LockManager,
        log: &LogManager,
    ) -> Result<Option<Tuple>> {
        let slot = rid.slot();
        if slot < 0 || slot >= self.tuple_count() {
            if log.is_enabled() {
                txn.set_state(TransactionState::Aborted);
            }
            return Ok(None);
        }
        let old_size = self.view().slot_size(slot as usize);
        if old_size <= 0 {
            if log.is_enabled() {
                txn.set_state(TransactionState::Aborted);
            }
            return Ok(None);
        }
        let new_size = new_tuple.size() as i32;
        ensure!(new_size > 0, "cannot update a tuple to an empty payload");
        if self.free_space() < new_size - old_size {
            return Ok(None);
        }

        let tuple_offset = self.view().slot_offset(slot as usize);
        let old_bytes =
            self.data[tuple_offset as usize..(tuple_offset + old_size) as usize].to_vec();
        let old_tuple = Tuple::with_rid(rid, old_bytes.clone());

        if log.is_enabled() {
            if txn.holds_shared(rid) {
                if !locks.lock_upgrade(txn, rid) {
                    return Ok(None);
                }
            } else if !txn.holds_exclusive(rid) && !locks.lock_exclusive(txn, rid) {
                return Ok(None);
            }

            let mut record = LogRecord::new(
                txn.id(),
                txn.prev_lsn(),
                LogPayload::Update {
                    rid,
                    old: old_bytes,
                    new: new_tuple.data().to_vec(),
                },
            );
            let lsn = log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.set_lsn(lsn);
        }

        // Shift the bodies below the old tuple by the size delta, then lay
        // the new tuple down at the adjusted position.
        let free_space_ptr = self.view().free_space_ptr();
        debug_assert!(tuple_offset >= free_space_ptr);
        let delta = old_size - new_size;
        self.data.copy_within(
            free_space_ptr as usize..tuple_offset as usize,
            (free_space_ptr + delta) as usize,
        );
        self.set_free_space_ptr(free_space_ptr + delta);
        let new_offset = tuple_offset + delta;
        self.data[new_offset as usize..(new_offset + new_size) as usize]
            .copy_from_slice(new_tuple.data());
        self.set_slot_size(slot as usize, new_size);

        let count = self.tuple_count();
        for i in 0..count as usize {
            let offset_i = self.view().slot_offset(i);
            if self.view().slot_size(i) != 0 && offset_i < tuple_offset + old_size {
                self.set_slot_offset(i, offset_i + delta);
            }
        }
        Ok(Some(old_tuple))
    }

    /// Physically removes the tuple (commit of a mark-delete, or undo of an
    /// insert), compacting the body region and zeroing the slot so it can
    /// be reused.
    pub fn apply_delete(&mut self, rid: Rid, txn: &Transaction, log: &LogManager) -> Result<()> {
        let slot = rid.slot();
        ensure!(
            slot >= 0 && slot < self.tuple_count(),
            "apply_delete on out-of-range slot {:?}",
            rid
        );
        let raw_size = self.view().slot_size(slot as usize);
        ensure!(raw_size != 0, "apply_delete on an empty slot {:?}", rid);
        let size = raw_size.abs();
        let tuple_offset = self.view().slot_offset(slot as usize);

        if log.is_enabled() {
            debug_assert!(
                txn.holds_exclusive(rid),
                "apply_delete without the exclusive lock"
            );
            let tuple = self.data[tuple_offset as usize..(tuple_offset + size) as usize].to_vec();
            let mut record = LogRecord::new(
                txn.id(),
                txn.prev_lsn(),
                LogPayload::ApplyDelete { rid, tuple },
            );
            let lsn = log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.set_lsn(lsn);
        }

        let free_space_ptr = self.view().free_space_ptr();
        debug_assert!(tuple_offset >= free_space_ptr);
        self.data.copy_within(
            free_space_ptr as usize..tuple_offset as usize,
            (free_space_ptr + size) as usize,
        );
        self.set_free_space_ptr(free_space_ptr + size);
        self.set_slot(slot as usize, 0, 0);

        let count = self.tuple_count();
        for i in 0..count as usize {
            let offset_i = self.view().slot_offset(i);
            if self.view().slot_size(i) != 0 && offset_i < tuple_offset {
                self.set_slot_offset(i, offset_i + size);
            }
        }
        Ok(())
    }

    /// Restores a marked-deleted tuple (abort of a mark-delete).
    pub fn rollback_delete(&mut self, rid: Rid, txn: &Transaction, log: &LogManager) -> Result<()> {
        let slot = rid.slot();
        ensure!(
            slot >= 0 && slot < self.tuple_count(),
            "rollback_delete on out-of-range slot {:?}",
            rid
        );
        let size = self.view().slot_size(slot as usize);

        if log.is_enabled() {
            debug_assert!(
                txn.holds_exclusive(rid),
                "rollback_delete without the exclusive lock"
            );
            let offset = self.view().slot_offset(slot as usize) as usize;
            let tuple = self.data[offset..offset + size.unsigned_abs() as usize].to_vec();
            let mut record = LogRecord::new(
                txn.id(),
                txn.prev_lsn(),
                LogPayload::RollbackDelete { rid, tuple },
            );
            let lsn = log.append(&mut record);
            txn.set_prev_lsn(lsn);
            self.set_lsn(lsn);
        }

        if size < 0 {
            self.set_slot_size(slot as usize, -size);
        }
        Ok(())
    }
}
