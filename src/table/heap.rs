//! # Table Heap
//!
//! A doubly linked list of slotted table pages holding one table's tuples.
//! The heap knows only its first page id; insertion walks the chain trying
//! each page and appends a freshly initialized page at the tail when
//! nothing fits. Tuple-level operations delegate to the page views under
//! the owning frame's latch and record undo information in the
//! transaction's write set.
//!
//! `TableHeap` is a cheap clone (shared handles + the first page id) so a
//! [`WriteRecord`](crate::txn::WriteRecord) can re-reach its table during
//! commit/abort replay.

use std::sync::Arc;

use eyre::Result;

use crate::buffer::BufferPoolManager;
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::table::{Rid, TablePage, TablePageMut, Tuple};
use crate::txn::{LockManager, Transaction, TransactionState, WriteKind, WriteRecord};
use crate::wal::LogManager;

#[derive(Clone)]
pub struct TableHeap {
    bpm: BufferPoolManager,
    locks: Arc<LockManager>,
    log: Arc<LogManager>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Creates a table: allocates and initializes its first page.
    pub fn create(
        bpm: BufferPoolManager,
        locks: Arc<LockManager>,
        log: Arc<LogManager>,
        txn: &Transaction,
    ) -> Result<Self> {
        let guard = bpm.new_page()?;
        let first_page_id = guard.page_id();
        {
            let mut latch = guard.write();
            let mut page = TablePageMut::new(latch.as_bytes_mut());
            page.init(first_page_id, INVALID_PAGE_ID, &log, txn);
        }
        guard.mark_dirty();
        Ok(Self {
            bpm,
            locks,
            log,
            first_page_id,
        })
    }

    /// Opens an existing table by its first page id (as recorded in the
    /// catalog header page).
    pub fn open(
        bpm: BufferPoolManager,
        locks: Arc<LockManager>,
        log: Arc<LogManager>,
        first_page_id: PageId,
    ) -> Self {
        Self {
            bpm,
            locks,
            log,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Inserts a tuple somewhere in the chain, appending a page at the tail
    /// if needed. `None` means the transaction was aborted (oversized tuple
    /// or lock failure).
    pub fn insert_tuple(&self, tuple: &Tuple, txn: &Transaction) -> Result<Option<Rid>> {
        // Tuple plus header and slot overhead must fit a page.
        if tuple.size() + 32 > PAGE_SIZE {
            txn.set_state(TransactionState::Aborted);
            return Ok(None);
        }

        let mut guard = self.fetch_or_abort(self.first_page_id, txn)?;
        loop {
            let mut latch = guard.write();
            let mut page = TablePageMut::new(latch.as_bytes_mut());
            if let Some(rid) = page.insert(tuple, txn, &self.locks, &self.log)? {
                drop(latch);
                guard.mark_dirty();
                txn.push_write(WriteRecord {
                    rid,
                    kind: WriteKind::Insert,
                    tuple: Tuple::default(),
                    table: self.clone(),
                });
                return Ok(Some(rid));
            }
            if txn.state() == TransactionState::Aborted {
                return Ok(None);
            }

            let next = page.next_page_id();
            if next != INVALID_PAGE_ID {
                drop(latch);
                guard = self.fetch_or_abort(next, txn)?;
                continue;
            }

            // Tail reached: append a page while still holding the tail's
            // latch so concurrent inserters cannot both extend the chain.
            let new_guard = match self.bpm.new_page() {
                Ok(new_guard) => new_guard,
                Err(err) => {
                    drop(latch);
                    txn.set_state(TransactionState::Aborted);
                    return Err(err);
                }
            };
            page.set_next_page_id(new_guard.page_id());
            {
                let mut new_latch = new_guard.write();
                let mut new_page = TablePageMut::new(new_latch.as_bytes_mut());
                new_page.init(new_guard.page_id(), guard.page_id(), &self.log, txn);
            }
            drop(latch);
            guard.mark_dirty();
            new_guard.mark_dirty();
            guard = new_guard;
        }
    }

    /// Rewrites `rid` in place, preserving the old image in the write set
    /// for rollback. Returns false when the page could not absorb the new
    /// size (callers fall back to delete + insert).
    pub fn update_tuple(&self, tuple: &Tuple, rid: Rid, txn: &Transaction) -> Result<bool> {
        let guard = self.fetch_or_abort(rid.page_id(), txn)?;
        let old = {
            let mut latch = guard.write();
            let mut page = TablePageMut::new(latch.as_bytes_mut());
            page.update(tuple, rid, txn, &self.locks, &self.log)?
        };
        let Some(old_tuple) = old else {
            return Ok(false);
        };
        guard.mark_dirty();
        // During abort replay the transaction is already ABORTED and the
        // restore must not grow the write set again.
        if txn.state() != TransactionState::Aborted {
            txn.push_write(WriteRecord {
                rid,
                kind: WriteKind::Update,
                tuple: old_tuple,
                table: self.clone(),
            });
        }
        Ok(true)
    }

    /// Marks `rid` deleted; the physical removal happens at commit.
    pub fn mark_delete(&self, rid: Rid, txn: &Transaction) -> Result<bool> {
        let guard = self.fetch_or_abort(rid.page_id(), txn)?;
        let marked = {
            let mut latch = guard.write();
            let mut page = TablePageMut::new(latch.as_bytes_mut());
            page.mark_delete(rid, txn, &self.locks, &self.log)?
        };
        if marked {
            guard.mark_dirty();
            txn.push_write(WriteRecord {
                rid,
                kind: WriteKind::Delete,
                tuple: Tuple::default(),
                table: self.clone(),
            });
        }
        Ok(marked)
    }

    /// Physically removes a tuple. Called at commit for marked deletes and
    /// at abort to erase an insert; the tuple's lock is released with the
    /// page latch still held.
    pub fn apply_delete(&self, rid: Rid, txn: &Transaction) -> Result<()> {
        let guard = self.bpm.fetch(rid.page_id())?;
        {
            let mut latch = guard.write();
            let mut page = TablePageMut::new(latch.as_bytes_mut());
            page.apply_delete(rid, txn, &self.log)?;
            self.locks.unlock(txn, rid);
        }
        guard.mark_dirty();
        Ok(())
    }

    /// Restores a marked-deleted tuple during abort.
    pub fn rollback_delete(&self, rid: Rid, txn: &Transaction) -> Result<()> {
        let guard = self.bpm.fetch(rid.page_id())?;
        {
            let mut latch = guard.write();
            let mut page = TablePageMut::new(latch.as_bytes_mut());
            page.rollback_delete(rid, txn, &self.log)?;
        }
        guard.mark_dirty();
        Ok(())
    }

    /// Reads the tuple at `rid` under a shared lock (unless one is already
    /// held). `None` aborts the transaction, mirroring the write paths.
    pub fn get_tuple(&self, rid: Rid, txn: &Transaction) -> Result<Option<Tuple>> {
        let guard = self.fetch_or_abort(rid.page_id(), txn)?;
        let latch = guard.read();
        let page = TablePage::new(latch.as_bytes());
        let tuple = page.get(rid, txn, &self.locks, &self.log)?;
        if tuple.is_none() {
            txn.set_state(TransactionState::Aborted);
        }
        Ok(tuple)
    }

    /// Iterator over live tuples in page order, slot order.
    pub fn iter<'t>(&self, txn: &'t Transaction) -> Result<TableIterator<'t>> {
        let cursor = self.first_rid()?;
        Ok(TableIterator {
            heap: self.clone(),
            txn,
            cursor,
        })
    }

    fn first_rid(&self) -> Result<Option<Rid>> {
        let mut page_id = self.first_page_id;
        while page_id != INVALID_PAGE_ID {
            let guard = self.bpm.fetch(page_id)?;
            let latch = guard.read();
            let page = TablePage::new(latch.as_bytes());
            if let Some(rid) = page.first_tuple_rid() {
                return Ok(Some(rid));
            }
            page_id = page.next_page_id();
        }
        Ok(None)
    }

    fn next_rid(&self, current: Rid) -> Result<Option<Rid>> {
        let mut page_id = current.page_id();
        let mut cursor = Some(current);
        while page_id != INVALID_PAGE_ID {
            let guard = self.bpm.fetch(page_id)?;
            let latch = guard.read();
            let page = TablePage::new(latch.as_bytes());
            let found = match cursor.take() {
                Some(rid) => page.next_tuple_rid(rid),
                None => page.first_tuple_rid(),
            };
            if found.is_some() {
                return Ok(found);
            }
            page_id = page.next_page_id();
        }
        Ok(None)
    }

    fn fetch_or_abort(
        &self,
        page_id: PageId,
        txn: &Transaction,
    ) -> Result<crate::buffer::PageGuard> {
        match self.bpm.fetch(page_id) {
            Ok(guard) => Ok(guard),
            Err(err) => {
                txn.set_state(TransactionState::Aborted);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TableHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHeap")
            .field("first_page_id", &self.first_page_id)
            .finish()
    }
}

pub struct TableIterator<'t> {
    heap: TableHeap,
    txn: &'t Transaction,
    cursor: Option<Rid>,
}

impl Iterator for TableIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rid = self.cursor?;
            self.cursor = match self.heap.next_rid(rid) {
                Ok(next) => next,
                Err(err) => {
                    self.cursor = None;
                    return Some(Err(err));
                }
            };
            match self.heap.get_tuple(rid, self.txn) {
                Ok(Some(tuple)) => return Some(Ok(tuple)),
                // Deleted under us between cursor advance and read; skip.
                Ok(None) => continue,
                Err(err) => {
                    self.cursor = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        heap: TableHeap,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("test.db")).unwrap());
        let bpm = BufferPoolManager::new(16, Arc::clone(&disk));
        let locks = Arc::new(LockManager::new(false));
        let log = LogManager::new(disk, false);
        let txn = Transaction::new(0);
        let heap = TableHeap::create(bpm, locks, log, &txn).unwrap();
        Fixture { _dir: dir, heap }
    }

    fn collect(heap: &TableHeap, txn: &Transaction) -> Vec<Vec<u8>> {
        heap.iter(txn)
            .unwrap()
            .map(|t| t.unwrap().data().to_vec())
            .collect()
    }

    #[test]
    fn insert_and_read_back() {
        let fx = fixture();
        let txn = Transaction::new(1);

        let rid = fx
            .heap
            .insert_tuple(&Tuple::new(vec![1, 2, 3]), &txn)
            .unwrap()
            .unwrap();
        let tuple = fx.heap.get_tuple(rid, &txn).unwrap().unwrap();
        assert_eq!(tuple.data(), &[1, 2, 3]);
        assert_eq!(txn.write_set_len(), 1);
    }

    #[test]
    fn oversized_tuple_aborts() {
        let fx = fixture();
        let txn = Transaction::new(1);

        let huge = Tuple::new(vec![0; PAGE_SIZE]);
        assert!(fx.heap.insert_tuple(&huge, &txn).unwrap().is_none());
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn inserts_spill_onto_new_pages() {
        let fx = fixture();
        let txn = Transaction::new(1);

        // Each tuple takes 1008 bytes of page space; 4 per page.
        let mut rids = Vec::new();
        for i in 0..10u8 {
            rids.push(
                fx.heap
                    .insert_tuple(&Tuple::new(vec![i; 1000]), &txn)
                    .unwrap()
                    .unwrap(),
            );
        }
        let pages: std::collections::HashSet<_> = rids.iter().map(|r| r.page_id()).collect();
        assert!(pages.len() >= 3, "expected the chain to grow, got {:?}", pages);

        let seen = collect(&fx.heap, &txn);
        assert_eq!(seen.len(), 10);
        for (i, data) in seen.iter().enumerate() {
            assert_eq!(data, &vec![i as u8; 1000]);
        }
    }

    #[test]
    fn update_preserves_old_image_in_write_set() {
        let fx = fixture();
        let txn = Transaction::new(1);

        let rid = fx
            .heap
            .insert_tuple(&Tuple::new(vec![5; 10]), &txn)
            .unwrap()
            .unwrap();
        assert!(fx
            .heap
            .update_tuple(&Tuple::new(vec![6; 10]), rid, &txn)
            .unwrap());

        let record = txn.pop_write().unwrap();
        assert_eq!(record.kind, WriteKind::Update);
        assert_eq!(record.tuple.data(), &[5; 10]);
    }

    #[test]
    fn mark_then_apply_delete_removes_the_tuple() {
        let fx = fixture();
        let txn = Transaction::new(1);

        let keep = fx
            .heap
            .insert_tuple(&Tuple::new(vec![1; 8]), &txn)
            .unwrap()
            .unwrap();
        let gone = fx
            .heap
            .insert_tuple(&Tuple::new(vec![2; 8]), &txn)
            .unwrap()
            .unwrap();

        assert!(fx.heap.mark_delete(gone, &txn).unwrap());
        fx.heap.apply_delete(gone, &txn).unwrap();

        let seen = collect(&fx.heap, &txn);
        assert_eq!(seen, vec![vec![1; 8]]);
        let _ = keep;
    }

    #[test]
    fn rollback_delete_brings_the_tuple_back() {
        let fx = fixture();
        let txn = Transaction::new(1);

        let rid = fx
            .heap
            .insert_tuple(&Tuple::new(vec![9; 8]), &txn)
            .unwrap()
            .unwrap();
        fx.heap.mark_delete(rid, &txn).unwrap();
        assert_eq!(collect(&fx.heap, &txn).len(), 0);

        fx.heap.rollback_delete(rid, &txn).unwrap();
        assert_eq!(collect(&fx.heap, &txn), vec![vec![9; 8]]);
    }

    #[test]
    fn empty_heap_iterates_nothing() {
        let fx = fixture();
        let txn = Transaction::new(1);
        assert!(collect(&fx.heap, &txn).is_empty());
    }
}
