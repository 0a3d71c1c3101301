//! # Storage Engine
//!
//! The aggregate that owns every subsystem: disk manager, buffer pool, log
//! manager, lock manager and transaction manager. Nothing in the engine is
//! global - callers hold a [`StorageEngine`] and thread [`Transaction`]
//! values through the tables and indexes it hands out.
//!
//! ```text
//! StorageEngine
//! ├── Arc<DiskManager>        X.db + X.log
//! ├── BufferPoolManager       frames, page table, replacer
//! ├── Arc<LogManager>         WAL staging + background flush
//! ├── Arc<LockManager>        tuple S/X locks, wait-die
//! ├── TransactionManager      begin / commit / abort
//! └── PageGuard               the header page, pinned for the engine's life
//! ```
//!
//! The catalog header page (page 0) is created on first open and kept
//! pinned so it can never be evicted mid-operation. Dropping the engine
//! flushes every cached page and shuts the log flush task down; reopening
//! the same path then sees all committed data.

use std::path::Path;
use std::sync::Arc;

use eyre::Result;

use crate::btree::{BPlusTree, IndexKey};
use crate::buffer::{BufferPoolManager, PageGuard};
use crate::config::{HEADER_PAGE_ID, DEFAULT_BUFFER_POOL_SIZE};
use crate::storage::{DiskManager, HeaderView};
use crate::table::TableHeap;
use crate::txn::{LockManager, Transaction, TransactionManager};
use crate::wal::LogManager;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Gates all WAL activity. Off by default, matching the test harness
    /// configurations that exercise storage without durability.
    pub enable_logging: bool,
    /// Strict two-phase locking: locks may only be released at
    /// commit/abort.
    pub strict_two_phase_locking: bool,
    pub buffer_pool_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            enable_logging: false,
            strict_two_phase_locking: false,
            buffer_pool_size: DEFAULT_BUFFER_POOL_SIZE,
        }
    }
}

pub struct StorageEngine {
    disk: Arc<DiskManager>,
    buffer_pool: BufferPoolManager,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
    txns: TransactionManager,
    /// Keeps page 0 resident for the engine's lifetime.
    header_guard: Option<PageGuard>,
}

impl StorageEngine {
    pub fn open(db_path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let disk = Arc::new(DiskManager::open(db_path)?);
        let fresh = disk.page_count() == 0;

        let log = LogManager::new(Arc::clone(&disk), options.enable_logging);
        let buffer_pool = BufferPoolManager::new(options.buffer_pool_size, Arc::clone(&disk));
        let locks = Arc::new(LockManager::new(options.strict_two_phase_locking));
        let txns = TransactionManager::new(Arc::clone(&log), Arc::clone(&locks));

        let header_guard = if fresh {
            // Allocates page 0; new_page zeroes it, which is a valid empty
            // catalog (record_count = 0).
            let guard = buffer_pool.new_page()?;
            debug_assert_eq!(guard.page_id(), HEADER_PAGE_ID);
            guard.mark_dirty();
            guard
        } else {
            buffer_pool.fetch(HEADER_PAGE_ID)?
        };

        Ok(Self {
            disk,
            buffer_pool,
            log,
            locks,
            txns,
            header_guard: Some(header_guard),
        })
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn begin(&self) -> Transaction {
        self.txns.begin()
    }

    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        self.txns.commit(txn)
    }

    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        self.txns.abort(txn)
    }

    /// Creates a table and registers its first page in the catalog.
    pub fn create_table(&self, name: &str, txn: &Transaction) -> Result<TableHeap> {
        let heap = TableHeap::create(
            self.buffer_pool.clone(),
            Arc::clone(&self.locks),
            Arc::clone(&self.log),
            txn,
        )?;
        let guard = self.buffer_pool.fetch(HEADER_PAGE_ID)?;
        {
            let mut latch = guard.write();
            let mut header = crate::storage::HeaderViewMut::new(latch.as_bytes_mut());
            eyre::ensure!(
                header.insert_record(name, heap.first_page_id())?,
                "table {:?} already exists",
                name
            );
        }
        guard.mark_dirty();
        Ok(heap)
    }

    /// Opens a table registered in the catalog.
    pub fn open_table(&self, name: &str) -> Result<TableHeap> {
        let first_page_id = {
            let guard = self.buffer_pool.fetch(HEADER_PAGE_ID)?;
            let latch = guard.read();
            HeaderView::new(latch.as_bytes())
                .get_root_id(name)
                .ok_or_else(|| eyre::eyre!("table {:?} not found in the catalog", name))?
        };
        Ok(TableHeap::open(
            self.buffer_pool.clone(),
            Arc::clone(&self.locks),
            Arc::clone(&self.log),
            first_page_id,
        ))
    }

    /// Creates a B+tree index with the given order.
    pub fn create_index<K: IndexKey>(&self, name: &str, order: usize) -> Result<BPlusTree<K>> {
        BPlusTree::create(name, self.buffer_pool.clone(), order)
    }

    /// Opens an existing B+tree index. The order must match the one the
    /// index was created with.
    pub fn open_index<K: IndexKey>(&self, name: &str, order: usize) -> Result<BPlusTree<K>> {
        BPlusTree::open(name, self.buffer_pool.clone(), order)
    }

    /// Writes every cached page to disk (data-page durability outside the
    /// WAL protocol; used at clean shutdown).
    pub fn flush_all(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        // Unpin the header page first so flush_all sees a quiescent pool.
        self.header_guard = None;
        let _ = self.buffer_pool.flush_all();
        self.log.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Tuple;
    use tempfile::tempdir;

    #[test]
    fn open_creates_the_header_page() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("db.db"), EngineOptions::default()).unwrap();
        assert_eq!(engine.disk().page_count(), 1);
    }

    #[test]
    fn tables_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.db");

        {
            let engine = StorageEngine::open(&path, EngineOptions::default()).unwrap();
            let txn = engine.begin();
            let table = engine.create_table("users", &txn).unwrap();
            table
                .insert_tuple(&Tuple::new(b"alice".to_vec()), &txn)
                .unwrap()
                .unwrap();
            engine.commit(&txn).unwrap();
        }

        let engine = StorageEngine::open(&path, EngineOptions::default()).unwrap();
        let txn = engine.begin();
        let table = engine.open_table("users").unwrap();
        let rows: Vec<_> = table
            .iter(&txn)
            .unwrap()
            .map(|t| t.unwrap().data().to_vec())
            .collect();
        assert_eq!(rows, vec![b"alice".to_vec()]);
    }

    #[test]
    fn duplicate_table_name_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("db.db"), EngineOptions::default()).unwrap();
        let txn = engine.begin();
        engine.create_table("t", &txn).unwrap();
        assert!(engine.create_table("t", &txn).is_err());
    }

    #[test]
    fn unknown_table_is_an_error() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("db.db"), EngineOptions::default()).unwrap();
        assert!(engine.open_table("missing").is_err());
    }
}
