//! # StrataDB Configuration Constants
//!
//! This module centralizes all configuration constants, grouping interdependent
//! values together and documenting their relationships. Constants that depend
//! on each other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> PAGE_HEADER_PREFIX (8 bytes: page id + page LSN)
//!       │
//!       ├─> TABLE_PAGE_HEADER_SIZE (24 bytes, fixed)
//!       │     Slot directory entries (8 bytes each) grow forward from
//!       │     byte 24; tuple bodies grow backward from byte 4096.
//!       │
//!       └─> LOG_BUFFER_SIZE (derived: (DEFAULT_BUFFER_POOL_SIZE + 1) pages)
//!             One staging buffer and one swap buffer of this size each.
//!
//! DEFAULT_BUFFER_POOL_SIZE (10 frames)
//!       │
//!       └─> LOG_BUFFER_SIZE (see above)
//!
//! BUCKET_SIZE (50)
//!       Extendible-hash bucket capacity before a split is attempted.
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `LOG_BUFFER_SIZE == (DEFAULT_BUFFER_POOL_SIZE + 1) * PAGE_SIZE`
//! 2. `TABLE_PAGE_HEADER_SIZE >= PAGE_HEADER_PREFIX` (the table header
//!    embeds the common page-id/LSN prefix)
//!
//! ## Sentinels
//!
//! Invalid ids are all `-1`; the catalog header page is always page 0 of the
//! database file. These values are part of the on-disk format and must never
//! change.

use std::time::Duration;

// ============================================================================
// PAGE LAYOUT CONSTANTS
// These define the fundamental page structure used throughout the engine
// ============================================================================

/// Size of each database page in bytes (4KB).
/// This is the fundamental unit of I/O and caching, and matches the
/// filesystem block size so a page write is contiguous on disk.
pub const PAGE_SIZE: usize = 4096;

/// Common prefix carried by every page: page id (4 bytes) + page LSN (4 bytes).
pub const PAGE_HEADER_PREFIX: usize = 8;

/// Size of the slotted table page header:
/// `page_id | lsn | prev_page_id | next_page_id | free_space_ptr | tuple_count`.
pub const TABLE_PAGE_HEADER_SIZE: usize = 24;

/// Size of one slot directory entry: `offset (4) | size (4)`.
pub const SLOT_ENTRY_SIZE: usize = 8;

const _: () = assert!(
    TABLE_PAGE_HEADER_SIZE >= PAGE_HEADER_PREFIX,
    "table page header must embed the common page prefix"
);

// ============================================================================
// BUFFER POOL CONFIGURATION
// ============================================================================

/// Default number of frames in the buffer pool. Callers supply their own
/// size at construction; this value sizes the log buffer and the test pools.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

/// Extendible-hash bucket capacity. A bucket holding more than this many
/// entries is split on the next insert.
pub const BUCKET_SIZE: usize = 50;

// ============================================================================
// WRITE-AHEAD LOG CONFIGURATION
// ============================================================================

/// Size of each of the two log buffers (staging + swap).
pub const LOG_BUFFER_SIZE: usize = (DEFAULT_BUFFER_POOL_SIZE + 1) * PAGE_SIZE;

/// Wire size of the common log record header:
/// `size (4) | lsn (4) | txn_id (4) | prev_lsn (4) | type (4)`.
pub const LOG_RECORD_HEADER_SIZE: usize = 20;

/// How long the background flush task sleeps before flushing the staging
/// buffer even when nobody asked for it (group-commit deadline).
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

const _: () = assert!(
    LOG_BUFFER_SIZE == (DEFAULT_BUFFER_POOL_SIZE + 1) * PAGE_SIZE,
    "LOG_BUFFER_SIZE derivation mismatch"
);

// ============================================================================
// SENTINELS (part of the on-disk format)
// ============================================================================

/// Denotes "no page".
pub const INVALID_PAGE_ID: i32 = -1;

/// Denotes "no transaction".
pub const INVALID_TXN_ID: i32 = -1;

/// Denotes "no log record".
pub const INVALID_LSN: i32 = -1;

/// The catalog header page is always page 0 of the database file.
pub const HEADER_PAGE_ID: i32 = 0;
