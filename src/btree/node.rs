//! # Node Header
//!
//! Both B+tree node kinds share a header behind the common page prefix:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------------
//! 0       4     page_id           (common prefix)
//! 4       4     lsn               (common prefix)
//! 8       4     page_type         (1 = interior, 2 = leaf)
//! 12      4     parent_page_id    (INVALID_PAGE_ID for the root)
//! 16      4     count             (leaf: keys; interior: child pointers)
//! 20      4     next_page_id      (leaves only)
//! ```
//!
//! Leaf entries start at byte 24, interior entries at byte 20. The node
//! kind is a tagged value read back as [`NodeType`]; an unknown tag is a
//! corruption error, not a panic.

use eyre::{bail, ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::config::{PageId, PAGE_SIZE};
use crate::storage::{read_i32, write_i32};

pub const NODE_TYPE_OFFSET: usize = 8;
pub const PARENT_OFFSET: usize = 12;
pub const COUNT_OFFSET: usize = 16;
pub const LEAF_NEXT_OFFSET: usize = 20;

pub const INTERIOR_CONTENT_START: usize = 20;
pub const LEAF_CONTENT_START: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Interior,
    Leaf,
}

pub fn node_type(data: &[u8]) -> Result<NodeType> {
    match read_i32(data, NODE_TYPE_OFFSET) {
        1 => Ok(NodeType::Interior),
        2 => Ok(NodeType::Leaf),
        other => bail!(
            "page {} is not a b+tree node (type tag {})",
            read_i32(data, 0),
            other
        ),
    }
}

pub fn set_node_type(data: &mut [u8], node_type: NodeType) {
    let tag = match node_type {
        NodeType::Interior => 1,
        NodeType::Leaf => 2,
    };
    write_i32(data, NODE_TYPE_OFFSET, tag);
}

pub fn parent_page_id(data: &[u8]) -> PageId {
    read_i32(data, PARENT_OFFSET)
}

pub fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    write_i32(data, PARENT_OFFSET, parent);
}

pub fn count(data: &[u8]) -> usize {
    read_i32(data, COUNT_OFFSET).max(0) as usize
}

pub fn set_count(data: &mut [u8], count: usize) {
    write_i32(data, COUNT_OFFSET, count as i32);
}

/// Copies a fixed-size value out of page bytes at `offset`.
pub fn read_at<T: FromBytes>(data: &[u8], offset: usize) -> Result<T> {
    let end = offset + std::mem::size_of::<T>();
    ensure!(
        end <= data.len(),
        "node entry read out of bounds: {}..{} on a {} byte page",
        offset,
        end,
        PAGE_SIZE
    );
    T::read_from_bytes(&data[offset..end])
        .map_err(|_| eyre::eyre!("short node entry read at offset {}", offset))
}

/// Writes a fixed-size value into page bytes at `offset`.
pub fn write_at<T: IntoBytes + Immutable>(data: &mut [u8], offset: usize, value: &T) -> Result<()> {
    let end = offset + std::mem::size_of::<T>();
    ensure!(
        end <= data.len(),
        "node entry write out of bounds: {}..{} on a {} byte page",
        offset,
        end,
        PAGE_SIZE
    );
    data[offset..end].copy_from_slice(value.as_bytes());
    Ok(())
}
