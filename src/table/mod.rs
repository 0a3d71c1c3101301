//! # Table Module
//!
//! Tuple storage: slotted pages chained into a heap.
//!
//! - `tuple`: [`Rid`] (page id + slot) and the owned [`Tuple`] payload
//! - `page`: the slotted-page views - insert / mark-delete / update /
//!   apply-delete / rollback-delete over raw page bytes
//! - `heap`: the page chain, tuple-level API and iterator
//!
//! The heap layers locking (via the lock manager) and logging (via the log
//! manager) onto every access according to the two-phase-locking protocol;
//! the page views do the byte work.

mod heap;
mod page;
mod tuple;

pub use heap::{TableHeap, TableIterator};
pub use page::{TablePage, TablePageMut};
pub use tuple::{Rid, Tuple, RID_SIZE};
