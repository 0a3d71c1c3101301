//! # Interior Nodes
//!
//! An interior node stores `count` child pointers separated by `count - 1`
//! keys, packed as fixed-size `(key, child_page_id)` entries from byte 20.
//! The key of entry 0 is a sentinel and never compared:
//!
//! ```text
//! entries:   (·, c0) (k1, c1) (k2, c2) ... (kn, cn)
//! semantics: c0 < k1 <= c1 < k2 <= c2 < ... <= cn
//! ```
//!
//! Child `i` covers keys `k` with `k_i <= k < k_{i+1}` (missing bounds are
//! ±∞). `count` is the number of child pointers - the node's *value* count;
//! the tree's order bounds it.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use crate::btree::key::IndexKey;
use crate::btree::node::{self, NodeType, INTERIOR_CONTENT_START};
use crate::config::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::{read_i32, write_i32};

pub const fn interior_entry_size<K: IndexKey>() -> usize {
    std::mem::size_of::<K>() + 4
}

pub const fn interior_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERIOR_CONTENT_START) / interior_entry_size::<K>()
}

pub struct InteriorNode<'a, K> {
    data: &'a [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InteriorNode<'a, K> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        ensure!(
            node::node_type(data)? == NodeType::Interior,
            "page {} is not an interior node",
            read_i32(data, 0)
        );
        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    pub fn page_id(&self) -> PageId {
        read_i32(self.data, 0)
    }

    pub fn parent_page_id(&self) -> PageId {
        node::parent_page_id(self.data)
    }

    /// Number of child pointers.
    pub fn value_count(&self) -> usize {
        node::count(self.data)
    }

    fn entry_offset(index: usize) -> usize {
        INTERIOR_CONTENT_START + index * interior_entry_size::<K>()
    }

    /// Separator key at `index`. Index 0 is the sentinel; reading it is
    /// legal only for the split/merge plumbing that relocates it.
    pub fn key_at(&self, index: usize) -> Result<K> {
        ensure!(
            index < self.value_count(),
            "interior key index {} out of range",
            index
        );
        node::read_at(self.data, Self::entry_offset(index))
    }

    pub fn value_at(&self, index: usize) -> Result<PageId> {
        ensure!(
            index < self.value_count(),
            "interior value index {} out of range",
            index
        );
        Ok(read_i32(
            self.data,
            Self::entry_offset(index) + std::mem::size_of::<K>(),
        ))
    }

    /// Index of the entry whose child pointer equals `child`.
    pub fn value_index(&self, child: PageId) -> Result<Option<usize>> {
        for index in 0..self.value_count() {
            if self.value_at(index)? == child {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Child covering `key`: binary search for the last separator `<= key`.
    pub fn lookup(&self, key: &K) -> Result<PageId> {
        let count = self.value_count();
        ensure!(count >= 1, "interior node {} has no children", self.page_id());
        if count == 1 {
            // Minimum-order trees can leave a node with a lone child.
            return self.value_at(0);
        }
        // First index in [1, count) whose key exceeds the probe.
        let mut lo = 1usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid)? <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.value_at(lo - 1)
    }

    /// Every child pointer, in order (used to re-parent after bulk moves).
    pub fn child_ids(&self) -> Result<Vec<PageId>> {
        (0..self.value_count()).map(|i| self.value_at(i)).collect()
    }

    pub fn raw_entries(&self, from: usize, to: usize) -> Result<Vec<u8>> {
        ensure!(
            from <= to && to <= self.value_count(),
            "interior entry range {}..{} out of bounds (count {})",
            from,
            to,
            self.value_count()
        );
        Ok(self.data[Self::entry_offset(from)..Self::entry_offset(to)].to_vec())
    }
}

pub struct InteriorNodeMut<'a, K> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InteriorNodeMut<'a, K> {
    pub fn new(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            node::node_type(data)? == NodeType::Interior,
            "page {} is not an interior node",
            read_i32(data, 0)
        );
        Ok(Self {
            data,
            _key: PhantomData,
        })
    }

    /// Formats a fresh page as an empty interior node.
    pub fn init(data: &'a mut [u8], page_id: PageId) -> Self {
        write_i32(data, 0, page_id);
        node::set_node_type(data, NodeType::Interior);
        node::set_parent_page_id(data, INVALID_PAGE_ID);
        node::set_count(data, 0);
        Self {
            data,
            _key: PhantomData,
        }
    }

    fn view(&self) -> InteriorNode<'_, K> {
        InteriorNode {
            data: self.data,
            _key: PhantomData,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.view().page_id()
    }

    pub fn parent_page_id(&self) -> PageId {
        self.view().parent_page_id()
    }

    pub fn value_count(&self) -> usize {
        self.view().value_count()
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        self.view().key_at(index)
    }

    pub fn value_at(&self, index: usize) -> Result<PageId> {
        self.view().value_at(index)
    }

    pub fn value_index(&self, child: PageId) -> Result<Option<usize>> {
        self.view().value_index(child)
    }

    pub fn child_ids(&self) -> Result<Vec<PageId>> {
        self.view().child_ids()
    }

    pub fn raw_entries(&self, from: usize, to: usize) -> Result<Vec<u8>> {
        self.view().raw_entries(from, to)
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        node::set_parent_page_id(self.data, parent);
    }

    pub fn set_key_at(&mut self, index: usize, key: K) -> Result<()> {
        ensure!(
            index < self.value_count(),
            "interior key index {} out of range",
            index
        );
        node::write_at(self.data, InteriorNode::<K>::entry_offset(index), &key)
    }

    fn set_value_at(&mut self, index: usize, child: PageId) -> Result<()> {
        ensure!(
            index < self.value_count(),
            "interior value index {} out of range",
            index
        );
        write_i32(
            self.data,
            InteriorNode::<K>::entry_offset(index) + std::mem::size_of::<K>(),
            child,
        );
        Ok(())
    }

    /// Turns an empty node into a root with two children: the split pair.
    pub fn populate_new_root(&mut self, left: PageId, key: K, right: PageId) -> Result<()> {
        ensure!(
            self.value_count() == 0,
            "populate_new_root on a non-empty node"
        );
        node::set_count(self.data, 2);
        self.set_value_at(0, left)?;
        self.set_key_at(1, key)?;
        self.set_value_at(1, right)?;
        Ok(())
    }

    /// Inserts `(key, new_child)` immediately after the entry pointing at
    /// `old_child`. Returns the new value count.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: K,
        new_child: PageId,
    ) -> Result<usize> {
        let count = self.value_count();
        ensure!(
            count < interior_capacity::<K>(),
            "interior page {} over capacity",
            self.page_id()
        );
        let position = self
            .view()
            .value_index(old_child)?
            .ok_or_else(|| eyre::eyre!("child {} not found in page {}", old_child, self.page_id()))?;

        let entry = interior_entry_size::<K>();
        let start = InteriorNode::<K>::entry_offset(position + 1);
        let end = InteriorNode::<K>::entry_offset(count);
        self.data.copy_within(start..end, start + entry);
        node::set_count(self.data, count + 1);
        self.set_key_at(position + 1, key)?;
        self.set_value_at(position + 1, new_child)?;
        Ok(count + 1)
    }

    /// Removes the entry at `index`, shifting later entries left.
    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let count = self.value_count();
        ensure!(index < count, "interior remove index {} out of range", index);
        let entry = interior_entry_size::<K>();
        let start = InteriorNode::<K>::entry_offset(index);
        let end = InteriorNode::<K>::entry_offset(count);
        self.data.copy_within(start + entry..end, start);
        node::set_count(self.data, count - 1);
        Ok(())
    }

    /// Prepends a child pointer, shifting every entry right. The caller
    /// must follow up with `set_key_at(1, ..)` to give the displaced first
    /// child its separator.
    pub fn insert_front(&mut self, child: PageId) -> Result<()> {
        let count = self.value_count();
        ensure!(
            count < interior_capacity::<K>(),
            "interior page {} over capacity",
            self.page_id()
        );
        let entry = interior_entry_size::<K>();
        let start = InteriorNode::<K>::entry_offset(0);
        let end = InteriorNode::<K>::entry_offset(count);
        self.data.copy_within(start..end, start + entry);
        node::set_count(self.data, count + 1);
        self.set_value_at(0, child)?;
        Ok(())
    }

    /// Appends `(key, child)` as the last entry.
    pub fn push_back(&mut self, key: K, child: PageId) -> Result<()> {
        let count = self.value_count();
        ensure!(
            count < interior_capacity::<K>(),
            "interior page {} over capacity",
            self.page_id()
        );
        node::set_count(self.data, count + 1);
        self.set_key_at(count, key)?;
        self.set_value_at(count, child)?;
        Ok(())
    }

    /// Appends `entry_count` raw entries (as produced by `raw_entries`).
    /// The first appended entry's key lands in whatever slot position it
    /// gets - for a fresh sibling that is the sentinel slot, which is
    /// exactly where a relocated separator belongs.
    pub fn append_raw(&mut self, raw: &[u8], entry_count: usize) -> Result<()> {
        ensure!(
            raw.len() == entry_count * interior_entry_size::<K>(),
            "raw interior entry block has wrong length"
        );
        let count = self.value_count();
        ensure!(
            count + entry_count <= interior_capacity::<K>(),
            "interior page {} over capacity",
            self.page_id()
        );
        let start = InteriorNode::<K>::entry_offset(count);
        self.data[start..start + raw.len()].copy_from_slice(raw);
        node::set_count(self.data, count + entry_count);
        Ok(())
    }

    /// Drops every entry at index `new_count` and beyond.
    pub fn truncate(&mut self, new_count: usize) -> Result<()> {
        ensure!(
            new_count <= self.value_count(),
            "interior truncate cannot grow the node"
        );
        node::set_count(self.data, new_count);
        Ok(())
    }
}
