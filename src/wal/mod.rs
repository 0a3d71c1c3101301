//! # Write-Ahead Log Module
//!
//! Log *production* for the storage engine: every table-page mutation emits
//! a typed record before its page latch is released, so log order equals
//! physical order, and commit forces the transaction's records to disk
//! before returning. Replay/recovery is intentionally out of scope - the
//! record codec round-trips so a recovery driver can be built on it later.
//!
//! - `record`: wire format (20-byte header + typed bodies)
//! - `manager`: LSN assignment, double-buffered staging, background group
//!   flush, the `persistent_lsn` commit gate

mod manager;
mod record;

pub use manager::LogManager;
pub use record::{LogPayload, LogRecord, LogRecordType};
