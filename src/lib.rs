//! # StrataDB - Page-Oriented Storage Engine
//!
//! StrataDB is the storage core of a disk-backed relational database: the
//! layer between a SQL front-end and raw disk I/O. It provides durable,
//! transactional tuple storage and an ordered secondary index, and nothing
//! above that - no parser, no planner, no network surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              StorageEngine (handle)           │
//! ├───────────────┬───────────────┬───────────────┤
//! │  TableHeap    │  BPlusTree    │ TxnManager    │
//! │  slotted pages│  ordered index│ begin/commit  │
//! ├───────────────┴───────┬───────┴───────────────┤
//! │  LockManager (S/X, wait-die)  │  LogManager   │
//! ├───────────────────────────────┴───────────────┤
//! │     BufferPoolManager (pin / LRU / latches)   │
//! ├───────────────────────────────────────────────┤
//! │        DiskManager (X.db pages, X.log WAL)    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Pages are fixed 4KB blocks addressed by id; the buffer pool is the only
//! path to them and the single source of truth for page identity. Tuple
//! mutations take tuple-level locks (two-phase, wait-die deadlock
//! prevention) and emit write-ahead log records before their page latch is
//! released; commit forces the log. The B+tree descends with latch
//! crabbing and scans ranges hand-over-hand along its leaf list.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratadb::{EngineOptions, StorageEngine, Tuple};
//!
//! let engine = StorageEngine::open("accounts.db", EngineOptions {
//!     enable_logging: true,
//!     ..Default::default()
//! })?;
//!
//! let txn = engine.begin();
//! let table = engine.create_table("accounts", &txn)?;
//! let rid = table.insert_tuple(&Tuple::new(b"alice,100".to_vec()), &txn)?;
//! engine.commit(&txn)?;
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: constants, sentinels and the core id types
//! - [`storage`]: disk manager, page buffer, catalog header page
//! - [`buffer`]: extendible-hash page table, LRU replacer, buffer pool
//! - [`table`]: slotted pages and the table heap
//! - [`btree`]: the concurrent B+tree index
//! - [`txn`]: transactions, tuple locking, commit/abort
//! - [`wal`]: log records and the group-flushing log manager
//! - [`engine`]: the aggregate tying it all together

pub mod btree;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod storage;
pub mod table;
pub mod txn;
pub mod wal;

pub use btree::{BPlusTree, IndexKey, TreeIterator};
pub use buffer::BufferPoolManager;
pub use config::{Lsn, PageId, TxnId};
pub use engine::{EngineOptions, StorageEngine};
pub use storage::DiskManager;
pub use table::{Rid, TableHeap, Tuple};
pub use txn::{LockManager, Transaction, TransactionManager, TransactionState};
pub use wal::{LogManager, LogPayload, LogRecord};
