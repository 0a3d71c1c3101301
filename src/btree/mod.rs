//! # B+Tree Index
//!
//! A concurrent, unique-key B+tree mapping fixed-size keys to tuple
//! [`Rid`](crate::table::Rid)s. Nodes live in buffer-pool pages; the tree
//! holds no memory pointers, only page ids resolved through
//! [`BufferPoolManager::fetch`](crate::buffer::BufferPoolManager::fetch).
//!
//! ## Architecture
//!
//! ```text
//!                      root: Arc<Mutex<PageId>>
//!                               │
//!                      [interior page 7]
//!                      /        |       \
//!             [leaf 3]      [leaf 5]     [leaf 9]
//!                │─────────────>│───────────>│        (leaf list)
//! ```
//!
//! - `key`: the [`IndexKey`] bound - fixed-size, ordered, zerocopy
//! - `node`: the header both node kinds share, plus typed byte accessors
//! - `leaf` / `interior`: views over page bytes with entry-level edits
//! - `tree`: descent, latch crabbing, split and merge orchestration
//! - `iterator`: hand-over-hand range scans along the leaf list
//!
//! Concurrency follows the classic crabbing protocol; see `tree` for the
//! exact safety rules and the role of the root mutex.

mod interior;
mod iterator;
mod key;
mod leaf;
mod node;
mod tree;

pub use interior::{interior_capacity, InteriorNode, InteriorNodeMut};
pub use iterator::TreeIterator;
pub use key::IndexKey;
pub use leaf::{leaf_capacity, LeafNode, LeafNodeMut, SearchResult};
pub use node::NodeType;
pub use tree::BPlusTree;
