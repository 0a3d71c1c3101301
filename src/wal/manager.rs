//! # Log Manager
//!
//! Asynchronous group flushing of log records. Mutation paths call
//! [`LogManager::append`], which assigns the next LSN and serializes the
//! record into a staging buffer; a background flush task swaps the staging
//! buffer against an empty one and hands the full buffer to the disk
//! manager. Commit blocks in [`LogManager::wait_for_flush`] until the
//! transaction's last LSN is durable (force-log-at-commit).
//!
//! ## Flush Task
//!
//! ```text
//!           append()                     flush task
//!        ┌────────────┐   swap under   ┌────────────┐
//!  ───>  │  staging   │ <────────────> │    swap    │ ──> DiskManager
//!        └────────────┘     mutex      └────────────┘     write_log()
//! ```
//!
//! The task wakes when the staging buffer cannot take the next record, when
//! a commit needs durability, or after `LOG_TIMEOUT` (1 s) - the group
//! commit deadline. The disk write happens outside the mutex so appenders
//! keep staging while a flush is in flight. `persistent_lsn` advances to
//! the last LSN of the buffer just written; LSNs are assigned under the
//! mutex, so buffer order equals LSN order.
//!
//! ## Invariants
//!
//! - LSNs are strictly increasing.
//! - A record is durable iff `lsn <= persistent_lsn()`.
//! - Commit returns only after its records satisfy the predicate above.
//!
//! When logging is disabled every entry point short-circuits and hands out
//! `INVALID_LSN`.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use eyre::{ensure, Result};
use parking_lot::{Condvar, Mutex};

use crate::config::{Lsn, INVALID_LSN, LOG_BUFFER_SIZE, LOG_TIMEOUT};
use crate::storage::DiskManager;
use crate::wal::LogRecord;

struct LogState {
    staging: Vec<u8>,
    /// LSN of the last record currently sitting in `staging`.
    staging_last_lsn: Lsn,
    flush_requested: bool,
    shutdown: bool,
}

struct LogCore {
    disk: Arc<DiskManager>,
    enabled: bool,
    state: Mutex<LogState>,
    /// Wakes the flush task.
    flush_cv: Condvar,
    /// Wakes appenders waiting for buffer space and commit waiters.
    flushed_cv: Condvar,
    next_lsn: AtomicI32,
    persistent_lsn: AtomicI32,
    io_failed: AtomicBool,
}

pub struct LogManager {
    core: Arc<LogCore>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk: Arc<DiskManager>, enabled: bool) -> Arc<Self> {
        let core = Arc::new(LogCore {
            disk,
            enabled,
            state: Mutex::new(LogState {
                staging: Vec::with_capacity(LOG_BUFFER_SIZE),
                staging_last_lsn: INVALID_LSN,
                flush_requested: false,
                shutdown: false,
            }),
            flush_cv: Condvar::new(),
            flushed_cv: Condvar::new(),
            next_lsn: AtomicI32::new(0),
            persistent_lsn: AtomicI32::new(INVALID_LSN),
            io_failed: AtomicBool::new(false),
        });

        let manager = Arc::new(Self {
            core: Arc::clone(&core),
            flush_task: Mutex::new(None),
        });

        if enabled {
            let task_core = Arc::clone(&core);
            let handle = std::thread::Builder::new()
                .name("stratadb-log-flush".into())
                .spawn(move || flush_loop(&task_core))
                .expect("failed to spawn log flush task");
            *manager.flush_task.lock() = Some(handle);
        }
        manager
    }

    pub fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    /// Highest LSN known durable.
    pub fn persistent_lsn(&self) -> Lsn {
        self.core.persistent_lsn.load(Ordering::SeqCst)
    }

    /// Assigns the next LSN to `record` and stages it for the flush task.
    /// Returns the assigned LSN, or `INVALID_LSN` when logging is disabled.
    pub fn append(&self, record: &mut LogRecord) -> Lsn {
        if !self.core.enabled {
            return INVALID_LSN;
        }

        let size = record.size();
        debug_assert!(size <= LOG_BUFFER_SIZE, "log record larger than buffer");

        let mut state = self.core.state.lock();
        while state.staging.len() + size > LOG_BUFFER_SIZE {
            state.flush_requested = true;
            self.core.flush_cv.notify_one();
            self.core.flushed_cv.wait(&mut state);
        }

        let lsn = self.core.next_lsn.fetch_add(1, Ordering::SeqCst);
        record.lsn = lsn;
        record.encode_into(&mut state.staging);
        state.staging_last_lsn = lsn;
        lsn
    }

    /// Blocks until `lsn` is durable. Nudges the flush task rather than
    /// waiting out the full group-commit deadline.
    pub fn wait_for_flush(&self, lsn: Lsn) -> Result<()> {
        if !self.core.enabled || lsn == INVALID_LSN {
            return Ok(());
        }
        let mut state = self.core.state.lock();
        loop {
            ensure!(
                !self.core.io_failed.load(Ordering::SeqCst),
                "log device failed; records at lsn {} cannot become durable",
                lsn
            );
            if self.core.persistent_lsn.load(Ordering::SeqCst) >= lsn {
                return Ok(());
            }
            state.flush_requested = true;
            self.core.flush_cv.notify_one();
            self.core.flushed_cv.wait_for(&mut state, LOG_TIMEOUT);
        }
    }

    /// Drains the staging buffer and joins the flush task. Idempotent;
    /// also run by `Drop`.
    pub fn shutdown(&self) {
        {
            let mut state = self.core.state.lock();
            state.shutdown = true;
            self.core.flush_cv.notify_one();
        }
        if let Some(handle) = self.flush_task.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn flush_loop(core: &LogCore) {
    let mut swap_buffer: Vec<u8> = Vec::with_capacity(LOG_BUFFER_SIZE);

    loop {
        let (last_lsn, shutting_down) = {
            let mut state = core.state.lock();
            if !state.shutdown && !state.flush_requested && state.staging.is_empty() {
                core.flush_cv.wait_for(&mut state, LOG_TIMEOUT);
            }
            std::mem::swap(&mut state.staging, &mut swap_buffer);
            let last = state.staging_last_lsn;
            state.flush_requested = false;
            (last, state.shutdown)
        };

        if !swap_buffer.is_empty() {
            match core.disk.write_log(&swap_buffer) {
                Ok(()) => {
                    core.persistent_lsn.store(last_lsn, Ordering::SeqCst);
                }
                Err(_) => {
                    core.io_failed.store(true, Ordering::SeqCst);
                }
            }
            swap_buffer.clear();
        }
        core.flushed_cv.notify_all();

        if shutting_down {
            let state = core.state.lock();
            if state.staging.is_empty() {
                return;
            }
        }
    }
}
