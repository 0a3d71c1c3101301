mod constants;

pub use constants::*;

/// Page identifier. Pages are addressed as `page_id * PAGE_SIZE` within the
/// database file; `INVALID_PAGE_ID` (-1) denotes "no page".
pub type PageId = i32;

/// Transaction identifier, assigned monotonically by the transaction manager.
pub type TxnId = i32;

/// Log sequence number, assigned monotonically by the log manager.
pub type Lsn = i32;

/// Index of a frame within the buffer pool's frame table.
pub type FrameId = usize;
