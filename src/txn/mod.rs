//! # Transaction Module
//!
//! Two-phase locking over tuples, transaction lifecycle, and the write-set
//! undo machinery.
//!
//! - `transaction`: the [`Transaction`] value threaded through every
//!   mutating call, its atomic state and its lock / write / deleted-page
//!   sets
//! - `lock_manager`: per-rid S/X/upgrade queues with wait-die prevention
//! - `manager`: begin / commit / abort orchestration against the write set
//!   and the write-ahead log

mod lock_manager;
mod manager;
mod transaction;

pub use lock_manager::LockManager;
pub use manager::TransactionManager;
pub use transaction::{Transaction, TransactionState, WriteKind, WriteRecord};
