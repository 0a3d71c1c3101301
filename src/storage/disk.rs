//! # Disk Manager
//!
//! The disk manager owns the two files backing a database: the page file
//! (`X.db`) and its companion write-ahead log (`X.log`, same stem). It
//! performs page-granular random I/O on the former and sequential appends
//! on the latter, and hands out fresh page ids.
//!
//! ## Page Allocation
//!
//! `allocate_page` is a monotonically increasing counter seeded from the
//! file size at open, so reopening an existing database continues where the
//! previous process stopped. `deallocate_page` is a no-op: freed ids are
//! never reused (tombstone tracking would live in the header page and is
//! future work).
//!
//! ## Durability Model
//!
//! `write_page` and `write_log` flush library buffers to the kernel but do
//! NOT fsync. Durability of data pages comes from the force-log-at-commit
//! protocol: a transaction is only reported committed once the log manager
//! observes `persistent_lsn >= txn.prev_lsn`.
//!
//! ## Observability
//!
//! `num_flushes` counts completed log writes and `flush_in_progress`
//! reports whether one is currently in flight. Both exist for tests that
//! assert the group-flush behavior of the log manager; the single flush
//! task serializes log writes, which is what lets `write_log` assume no
//! concurrent flush is active.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;

use crate::config::{PageId, PAGE_SIZE};

pub struct DiskManager {
    db_path: PathBuf,
    log_path: PathBuf,
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
    num_flushes: AtomicU32,
    flush_in_progress: AtomicBool,
}

impl DiskManager {
    /// Opens (creating if absent) the database file and its `.log` sibling.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let log_path = db_path.with_extension("log");

        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)
            .wrap_err_with(|| format!("failed to open database file {:?}", db_path))?;
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)
            .wrap_err_with(|| format!("failed to open log file {:?}", log_path))?;

        let db_len = db_file
            .metadata()
            .wrap_err("failed to stat database file")?
            .len();
        let next_page_id = (db_len as usize / PAGE_SIZE) as i32;

        Ok(Self {
            db_path,
            log_path,
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicI32::new(next_page_id),
            num_flushes: AtomicU32::new(0),
            flush_in_progress: AtomicBool::new(false),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Returns a fresh page id, effectively appending a page slot to the file.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Tombstone tracking is future work; freed ids are never reused.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Number of pages ever allocated (also the logical file length in pages).
    pub fn page_count(&self) -> i32 {
        self.next_page_id.load(Ordering::SeqCst)
    }

    /// Reads page `page_id` into `buf`. A read that ends short of a full
    /// page zero-fills the tail; a read entirely past EOF is an error.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        ensure!(page_id >= 0, "invalid page id {} passed to read_page", page_id);
        ensure!(
            buf.len() == PAGE_SIZE,
            "read_page buffer is {} bytes, want {}",
            buf.len(),
            PAGE_SIZE
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        let file_len = file.metadata().wrap_err("failed to stat database file")?.len();
        ensure!(
            offset < file_len,
            "short read: page {} is past the end of {:?} ({} bytes)",
            page_id,
            self.db_path,
            file_len
        );

        file.seek(SeekFrom::Start(offset))
            .wrap_err("seek failed during page read")?;
        let mut read = 0usize;
        while read < PAGE_SIZE {
            let n = file
                .read(&mut buf[read..])
                .wrap_err_with(|| format!("failed to read page {}", page_id))?;
            if n == 0 {
                break;
            }
            read += n;
        }
        if read < PAGE_SIZE {
            buf[read..].fill(0);
        }
        Ok(())
    }

    /// Writes `buf` at page `page_id` and flushes library buffers to the
    /// kernel (no fsync; see the module docs for the durability model).
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        ensure!(page_id >= 0, "invalid page id {} passed to write_page", page_id);
        ensure!(
            buf.len() == PAGE_SIZE,
            "write_page buffer is {} bytes, want {}",
            buf.len(),
            PAGE_SIZE
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))
            .wrap_err("seek failed during page write")?;
        file.write_all(buf)
            .wrap_err_with(|| format!("failed to write page {}", page_id))?;
        file.flush().wrap_err("failed to flush database file")?;
        Ok(())
    }

    /// Sequentially appends `buf` to the log file. Empty buffers are ignored
    /// without counting a flush. The single background flush task is the
    /// only caller, so at most one flush is in flight at a time.
    pub fn write_log(&self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        debug_assert!(
            !self.flush_in_progress.load(Ordering::Acquire),
            "overlapping log flushes"
        );
        self.flush_in_progress.store(true, Ordering::Release);
        self.num_flushes.fetch_add(1, Ordering::Relaxed);

        let result = (|| -> Result<()> {
            let mut file = self.log_file.lock();
            file.seek(SeekFrom::End(0))
                .wrap_err("seek failed during log write")?;
            file.write_all(buf).wrap_err("failed to append to log file")?;
            file.flush().wrap_err("failed to flush log file")?;
            Ok(())
        })();

        self.flush_in_progress.store(false, Ordering::Release);
        result
    }

    /// Sequential read for recovery tooling. Returns `Ok(false)` at EOF; a
    /// short read zero-fills the remainder of `buf`.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool> {
        let mut file = self.log_file.lock();
        let file_len = file.metadata().wrap_err("failed to stat log file")?.len();
        if offset >= file_len {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))
            .wrap_err("seek failed during log read")?;
        let mut read = 0usize;
        while read < buf.len() {
            let n = file
                .read(&mut buf[read..])
                .wrap_err("failed to read log file")?;
            if n == 0 {
                break;
            }
            read += n;
        }
        if read < buf.len() {
            buf[read..].fill(0);
        }
        Ok(true)
    }

    pub fn num_flushes(&self) -> u32 {
        self.num_flushes.load(Ordering::Relaxed)
    }

    pub fn flush_in_progress(&self) -> bool {
        self.flush_in_progress.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("db_path", &self.db_path)
            .field("next_page_id", &self.next_page_id.load(Ordering::SeqCst))
            .finish()
    }
}
