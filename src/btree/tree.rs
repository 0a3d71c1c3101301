//! # B+Tree
//!
//! A unique-key ordered index mapping keys to [`Rid`]s. Nodes are pages
//! resolved through the buffer pool; parent/child links are page ids, never
//! pointers. The tree's order `m` bounds an interior node to `m` children
//! and a leaf to `m - 1` keys.
//!
//! ## Latch Crabbing
//!
//! Lookups descend hand-over-hand with read latches: latch the child, then
//! release the parent, holding at most two latches. Mutating descents keep
//! a *stack* of write latches from the root down and truncate it whenever
//! the child is safe - a node that cannot split (insert) or underflow
//! (delete) shields its ancestors from any restructuring below it.
//!
//! The root page id lives behind its own mutex, held (as an owned guard in
//! the descent context) for the duration of any mutation that might change
//! it and released early the moment a safe node proves it cannot. Readers
//! take it only long enough to copy the id.
//!
//! ## Splits
//!
//! A leaf reaching `m` keys moves its upper ceiling-half into a fresh right
//! sibling, links the sibling into the leaf list, and pushes the sibling's
//! first key into the parent. An interior node exceeding `m` children moves
//! its upper half (the relocated separator riding along in the sentinel
//! slot) and re-parents the moved children. Splitting the root mints a new
//! root and updates the catalog header page.
//!
//! ## Deletes
//!
//! An underflowing node first tries to borrow from a sibling that can
//! spare an entry (left preferred, right for the leftmost child), updating
//! the parent's separator; otherwise the right-hand node of the pair is
//! merged into the left-hand one - separator pulled down for interior
//! merges, leaf list relinked for leaf merges - and the parent recurses.
//! A root reduced to a single child (or an empty leaf root) is retired via
//! `adjust_root`. Pages emptied by merges are handed to the buffer pool
//! once every latch is released.

use std::marker::PhantomData;
use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::btree::interior::{interior_capacity, InteriorNode, InteriorNodeMut};
use crate::btree::key::IndexKey;
use crate::btree::leaf::{leaf_capacity, LeafNode, LeafNodeMut, SearchResult};
use crate::btree::node::{self, NodeType};
use crate::btree::TreeIterator;
use crate::buffer::{BufferPoolManager, PageGuard, PageWriteGuard};
use crate::config::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::HeaderViewMut;
use crate::table::Rid;
use crate::txn::Transaction;

type RootGuard = ArcMutexGuard<RawMutex, PageId>;

/// A page pinned and write-latched for the duration of a mutating descent.
/// Field order drops the latch before the pin.
struct WriteLatched {
    latch: PageWriteGuard,
    guard: PageGuard,
}

impl WriteLatched {
    fn page_id(&self) -> PageId {
        self.guard.page_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Insert,
    Remove,
}

/// State of one mutating descent: the root mutex (until a safe node lets
/// go of it), the write-latch stack, and pages emptied by merges that are
/// recycled after the latches drop.
struct MutContext {
    root_guard: Option<RootGuard>,
    stack: Vec<WriteLatched>,
    deleted: Vec<PageId>,
}

pub struct BPlusTree<K: IndexKey> {
    name: String,
    bpm: BufferPoolManager,
    root: Arc<Mutex<PageId>>,
    order: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Creates an index and registers it in the catalog header page.
    pub fn create(name: impl Into<String>, bpm: BufferPoolManager, order: usize) -> Result<Self> {
        let name = name.into();
        Self::validate_order(order)?;

        let guard = bpm.fetch(HEADER_PAGE_ID)?;
        {
            let mut latch = guard.write();
            let mut header = HeaderViewMut::new(latch.as_bytes_mut());
            ensure!(
                header.insert_record(&name, INVALID_PAGE_ID)?,
                "index {:?} already exists",
                name
            );
        }
        guard.mark_dirty();

        Ok(Self {
            name,
            bpm,
            root: Arc::new(Mutex::new(INVALID_PAGE_ID)),
            order,
            _key: PhantomData,
        })
    }

    /// Opens an index previously registered in the catalog header page.
    /// The order is configuration, not on-disk state, and must match the
    /// order the index was built with.
    pub fn open(name: impl Into<String>, bpm: BufferPoolManager, order: usize) -> Result<Self> {
        let name = name.into();
        Self::validate_order(order)?;

        let root_id = {
            let guard = bpm.fetch(HEADER_PAGE_ID)?;
            let latch = guard.read();
            let header = crate::storage::HeaderView::new(latch.as_bytes());
            header
                .get_root_id(&name)
                .ok_or_else(|| eyre!("index {:?} not found in the catalog", name))?
        };

        Ok(Self {
            name,
            bpm,
            root: Arc::new(Mutex::new(root_id)),
            order,
            _key: PhantomData,
        })
    }

    fn validate_order(order: usize) -> Result<()> {
        ensure!(order >= 2, "b+tree order must be at least 2, got {}", order);
        // Leaves transiently hold `order` entries and interior nodes
        // `order + 1` children before their splits run.
        ensure!(
            order <= leaf_capacity::<K>() && order + 1 <= interior_capacity::<K>(),
            "b+tree order {} exceeds page capacity (leaf {}, interior {})",
            order,
            leaf_capacity::<K>(),
            interior_capacity::<K>()
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        *self.root.lock() == INVALID_PAGE_ID
    }

    /// Minimum keys a non-root leaf must hold: `(m + 1) / 2 - 1`, rounding
    /// down. Rounding up would let two at-minimum siblings overflow their
    /// merge for even orders.
    fn min_keys(&self) -> usize {
        (self.order + 1) / 2 - 1
    }

    /// Minimum children a non-root interior node must hold: `(m + 1) / 2`,
    /// rounding down (see `min_keys`).
    fn min_values(&self) -> usize {
        (self.order + 1) / 2
    }

    // ------------------------------------------------------------------
    // Point lookup
    // ------------------------------------------------------------------

    /// Finds the rid stored under `key`, hand-over-hand with read latches.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        let root_id = *self.root.lock();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch(root_id)?;
        let mut latch = guard.read();
        loop {
            match node::node_type(latch.as_bytes())? {
                NodeType::Leaf => {
                    let leaf = LeafNode::<K>::new(latch.as_bytes())?;
                    return match leaf.search(key)? {
                        SearchResult::Found(index) => Ok(Some(leaf.rid_at(index)?)),
                        SearchResult::NotFound(_) => Ok(None),
                    };
                }
                NodeType::Interior => {
                    let child = InteriorNode::<K>::new(latch.as_bytes())?.lookup(key)?;
                    let child_guard = self.bpm.fetch(child)?;
                    let child_latch = child_guard.read();
                    latch = child_latch;
                    guard = child_guard;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Inserts `key -> rid`. Returns false when the key already exists
    /// (unique-key tree).
    pub fn insert(&self, key: K, rid: Rid, _txn: &Transaction) -> Result<bool> {
        let mut root_guard = self.root.lock_arc();
        if *root_guard == INVALID_PAGE_ID {
            self.start_new_tree(&mut root_guard, key, rid)?;
            return Ok(true);
        }

        let mut ctx = MutContext {
            root_guard: Some(root_guard),
            stack: Vec::new(),
            deleted: Vec::new(),
        };
        self.descend_for_write(&mut ctx, &key, TreeOp::Insert)?;

        let inserted = {
            let top = ctx.stack.last_mut().expect("descent ends at a leaf");
            let mut leaf = LeafNodeMut::<K>::new(top.latch.as_bytes_mut())?;
            match leaf.search(&key)? {
                SearchResult::Found(_) => false,
                SearchResult::NotFound(position) => {
                    leaf.insert_at(position, key, rid)?;
                    top.guard.mark_dirty();
                    true
                }
            }
        };
        if !inserted {
            return Ok(false);
        }

        let needs_split = {
            let top = ctx.stack.last().expect("leaf still latched");
            LeafNode::<K>::new(top.latch.as_bytes())?.key_count() >= self.order
        };
        if needs_split {
            self.split_leaf(&mut ctx)?;
        }
        Ok(true)
    }

    fn start_new_tree(&self, root_guard: &mut RootGuard, key: K, rid: Rid) -> Result<()> {
        let guard = self.bpm.new_page()?;
        let page_id = guard.page_id();
        {
            let mut latch = guard.write();
            let mut leaf = LeafNodeMut::<K>::init(latch.as_bytes_mut(), page_id);
            leaf.insert_at(0, key, rid)?;
        }
        guard.mark_dirty();
        **root_guard = page_id;
        self.update_header_root(page_id)
    }

    /// Descends to the leaf for `key`, stacking write latches and dropping
    /// every ancestor (and the root mutex) as soon as a node is safe for
    /// `op`.
    fn descend_for_write(&self, ctx: &mut MutContext, key: &K, op: TreeOp) -> Result<()> {
        let mut page_id = **ctx.root_guard.as_ref().expect("descent starts under the root mutex");
        let mut at_root = true;
        loop {
            let guard = self.bpm.fetch(page_id)?;
            let latch = guard.write();
            let node_type = node::node_type(latch.as_bytes())?;
            if self.is_safe(latch.as_bytes(), node_type, at_root, op) {
                ctx.stack.clear();
                ctx.root_guard = None;
            }
            let next = match node_type {
                NodeType::Leaf => None,
                NodeType::Interior => {
                    Some(InteriorNode::<K>::new(latch.as_bytes())?.lookup(key)?)
                }
            };
            ctx.stack.push(WriteLatched { latch, guard });
            match next {
                None => return Ok(()),
                Some(child) => page_id = child,
            }
            at_root = false;
        }
    }

    /// A node is safe when the operation cannot restructure anything above
    /// it: an insert that cannot overflow it, a delete that cannot push it
    /// under its minimum (or, for the root, force a root change).
    fn is_safe(&self, data: &[u8], node_type: NodeType, is_root: bool, op: TreeOp) -> bool {
        let count = node::count(data);
        match (op, node_type) {
            (TreeOp::Insert, NodeType::Leaf) => count < self.order - 1,
            (TreeOp::Insert, NodeType::Interior) => count < self.order,
            (TreeOp::Remove, NodeType::Leaf) => {
                if is_root {
                    count > 1
                } else {
                    count > self.min_keys()
                }
            }
            (TreeOp::Remove, NodeType::Interior) => {
                if is_root {
                    count > 2
                } else {
                    count > self.min_values()
                }
            }
        }
    }

    /// Splits the leaf on top of the stack: upper ceiling-half to a fresh
    /// right sibling, leaf list relinked, separator pushed to the parent.
    fn split_leaf(&self, ctx: &mut MutContext) -> Result<()> {
        let mut leaf_wl = ctx.stack.pop().expect("split target on the stack");
        let sibling_guard = self.bpm.new_page()?;
        let sibling_latch = sibling_guard.write();
        let mut sibling_wl = WriteLatched {
            latch: sibling_latch,
            guard: sibling_guard,
        };
        let sibling_id = sibling_wl.page_id();

        let split_key = {
            let mut leaf = LeafNodeMut::<K>::new(leaf_wl.latch.as_bytes_mut())?;
            let count = leaf.key_count();
            let move_count = (count + 1) / 2;
            let start = count - move_count;
            let moved = leaf.raw_entries(start, count)?;
            let parent_id = leaf.parent_page_id();
            let old_next = leaf.next_page_id();

            let mut sibling =
                LeafNodeMut::<K>::init(sibling_wl.latch.as_bytes_mut(), sibling_id);
            sibling.set_parent_page_id(parent_id);
            sibling.append_raw(&moved, move_count)?;
            sibling.set_next_page_id(old_next);

            leaf.truncate(start)?;
            leaf.set_next_page_id(sibling_id);
            sibling.key_at(0)?
        };
        leaf_wl.guard.mark_dirty();
        sibling_wl.guard.mark_dirty();

        self.insert_into_parent(ctx, &mut leaf_wl, split_key, &mut sibling_wl)
    }

    /// Hooks `right` (the fresh split sibling of `left`) into the tree,
    /// splitting ancestors as needed. `left` and `right` stay latched so
    /// their parent pointers can be fixed without re-latching them when an
    /// ancestor split moves them.
    fn insert_into_parent(
        &self,
        ctx: &mut MutContext,
        left: &mut WriteLatched,
        key: K,
        right: &mut WriteLatched,
    ) -> Result<()> {
        if ctx.stack.is_empty() {
            // `left` was the root: mint a new one above the pair.
            let root_guard = ctx
                .root_guard
                .as_mut()
                .expect("root split reached without the root mutex");
            let new_root_guard = self.bpm.new_page()?;
            let new_root_id = new_root_guard.page_id();
            {
                let mut latch = new_root_guard.write();
                let mut root = InteriorNodeMut::<K>::init(latch.as_bytes_mut(), new_root_id);
                root.populate_new_root(left.page_id(), key, right.page_id())?;
            }
            new_root_guard.mark_dirty();
            node::set_parent_page_id(left.latch.as_bytes_mut(), new_root_id);
            node::set_parent_page_id(right.latch.as_bytes_mut(), new_root_id);
            **root_guard = new_root_id;
            return self.update_header_root(new_root_id);
        }

        let mut parent_wl = ctx.stack.pop().expect("parent latched on the stack");
        let parent_id = parent_wl.page_id();
        let value_count = {
            let mut parent = InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?;
            let count = parent.insert_node_after(left.page_id(), key, right.page_id())?;
            node::set_parent_page_id(right.latch.as_bytes_mut(), parent_id);
            count
        };
        parent_wl.guard.mark_dirty();

        if value_count <= self.order {
            return Ok(());
        }

        // Parent overflowed: split it and keep propagating.
        let sibling_guard = self.bpm.new_page()?;
        let sibling_latch = sibling_guard.write();
        let mut sibling_wl = WriteLatched {
            latch: sibling_latch,
            guard: sibling_guard,
        };
        let sibling_id = sibling_wl.page_id();

        let (push_key, moved_children) = {
            let mut parent = InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?;
            let count = parent.value_count();
            let key_count = count - 1;
            let move_count = (key_count + 1) / 2;
            let start = count - move_count;
            let moved = parent.raw_entries(start, count)?;
            let grandparent = parent.parent_page_id();

            let mut sibling =
                InteriorNodeMut::<K>::init(sibling_wl.latch.as_bytes_mut(), sibling_id);
            sibling.set_parent_page_id(grandparent);
            sibling.append_raw(&moved, move_count)?;
            parent.truncate(start)?;

            // The relocated separator rides in the sibling's sentinel slot.
            (sibling.key_at(0)?, sibling.child_ids()?)
        };
        parent_wl.guard.mark_dirty();
        sibling_wl.guard.mark_dirty();

        for child in moved_children {
            if child == left.page_id() {
                node::set_parent_page_id(left.latch.as_bytes_mut(), sibling_id);
            } else if child == right.page_id() {
                node::set_parent_page_id(right.latch.as_bytes_mut(), sibling_id);
            } else {
                self.set_child_parent(child, sibling_id)?;
            }
        }

        self.insert_into_parent(ctx, &mut parent_wl, push_key, &mut sibling_wl)
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Removes `key` if present; absent keys are a silent no-op.
    pub fn remove(&self, key: &K, txn: &Transaction) -> Result<()> {
        let root_guard = self.root.lock_arc();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ctx = MutContext {
            root_guard: Some(root_guard),
            stack: Vec::new(),
            deleted: Vec::new(),
        };
        self.descend_for_write(&mut ctx, key, TreeOp::Remove)?;

        let removed = {
            let top = ctx.stack.last_mut().expect("descent ends at a leaf");
            let mut leaf = LeafNodeMut::<K>::new(top.latch.as_bytes_mut())?;
            match leaf.search(key)? {
                SearchResult::Found(position) => {
                    leaf.remove_at(position)?;
                    top.guard.mark_dirty();
                    true
                }
                SearchResult::NotFound(_) => false,
            }
        };
        if removed {
            self.coalesce_or_redistribute(&mut ctx, txn)?;
        }

        for page_id in std::mem::take(&mut ctx.deleted) {
            txn.add_deleted_page(page_id);
        }
        drop(ctx);
        for page_id in txn.take_deleted_pages() {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Rebalances the node on top of the stack after a removal, recursing
    /// into the parent when a merge removes a separator from it.
    fn coalesce_or_redistribute(&self, ctx: &mut MutContext, txn: &Transaction) -> Result<()> {
        let mut node_wl = ctx.stack.pop().expect("rebalance target on the stack");
        let node_type = node::node_type(node_wl.latch.as_bytes())?;

        if node::parent_page_id(node_wl.latch.as_bytes()) == INVALID_PAGE_ID {
            return self.adjust_root(ctx, node_wl, node_type);
        }

        let count = node::count(node_wl.latch.as_bytes());
        let minimum = match node_type {
            NodeType::Leaf => self.min_keys(),
            NodeType::Interior => self.min_values(),
        };
        if count >= minimum {
            return Ok(());
        }

        // Underflow: the descent kept the parent latched for exactly this.
        let node_id = node_wl.page_id();
        let (node_index, left_id, right_id) = {
            let parent_wl = ctx
                .stack
                .last()
                .expect("underflowing node kept its parent latched");
            let parent = InteriorNode::<K>::new(parent_wl.latch.as_bytes())?;
            let index = parent
                .value_index(node_id)?
                .ok_or_else(|| eyre!("page {} missing from its parent", node_id))?;
            let left = if index > 0 {
                Some(parent.value_at(index - 1)?)
            } else {
                None
            };
            let right = if index + 1 < parent.value_count() {
                Some(parent.value_at(index + 1)?)
            } else {
                None
            };
            (index, left, right)
        };

        if let Some(left_id) = left_id {
            let left_guard = self.bpm.fetch(left_id)?;
            let left_latch = left_guard.write();
            let mut left_wl = WriteLatched {
                latch: left_latch,
                guard: left_guard,
            };
            if self.can_spare(left_wl.latch.as_bytes(), node_type) {
                return self.redistribute_from_left(ctx, &mut left_wl, &mut node_wl, node_type, node_index);
            }
            if let Some(right_id) = right_id {
                let right_guard = self.bpm.fetch(right_id)?;
                let right_latch = right_guard.write();
                let mut right_wl = WriteLatched {
                    latch: right_latch,
                    guard: right_guard,
                };
                if self.can_spare(right_wl.latch.as_bytes(), node_type) {
                    return self.redistribute_from_right(
                        ctx,
                        &mut node_wl,
                        &mut right_wl,
                        node_type,
                        node_index,
                    );
                }
            }
            // Merge the node into its left sibling.
            self.coalesce(ctx, txn, left_wl, node_wl, node_type, node_index)
        } else {
            let right_id = right_id.expect("a non-root node has at least one sibling");
            let right_guard = self.bpm.fetch(right_id)?;
            let right_latch = right_guard.write();
            let mut right_wl = WriteLatched {
                latch: right_latch,
                guard: right_guard,
            };
            if self.can_spare(right_wl.latch.as_bytes(), node_type) {
                return self.redistribute_from_right(ctx, &mut node_wl, &mut right_wl, node_type, node_index);
            }
            // Leftmost child: merge the right sibling into the node.
            self.coalesce(ctx, txn, node_wl, right_wl, node_type, node_index + 1)
        }
    }

    /// Whether a sibling can give up one entry and stay at its minimum.
    fn can_spare(&self, data: &[u8], node_type: NodeType) -> bool {
        let count = node::count(data);
        let minimum = match node_type {
            NodeType::Leaf => self.min_keys(),
            NodeType::Interior => self.min_values(),
        };
        count > minimum
    }

    /// Moves the left sibling's last entry to the front of `node` and
    /// refreshes the parent separator at `node_index`.
    fn redistribute_from_left(
        &self,
        ctx: &mut MutContext,
        left: &mut WriteLatched,
        node: &mut WriteLatched,
        node_type: NodeType,
        node_index: usize,
    ) -> Result<()> {
        let parent_wl = ctx.stack.last_mut().expect("parent latched");
        match node_type {
            NodeType::Leaf => {
                let (key, rid) = {
                    let mut left_leaf = LeafNodeMut::<K>::new(left.latch.as_bytes_mut())?;
                    let last = left_leaf.key_count() - 1;
                    let entry = (left_leaf.key_at(last)?, left_leaf.rid_at(last)?);
                    left_leaf.truncate(last)?;
                    entry
                };
                LeafNodeMut::<K>::new(node.latch.as_bytes_mut())?.insert_at(0, key, rid)?;
                InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?
                    .set_key_at(node_index, key)?;
            }
            NodeType::Interior => {
                let (borrowed_key, borrowed_child) = {
                    let left_node = InteriorNode::<K>::new(left.latch.as_bytes())?;
                    let last = left_node.value_count() - 1;
                    (left_node.key_at(last)?, left_node.value_at(last)?)
                };
                let old_separator = InteriorNode::<K>::new(parent_wl.latch.as_bytes())?
                    .key_at(node_index)?;
                {
                    let mut left_node = InteriorNodeMut::<K>::new(left.latch.as_bytes_mut())?;
                    let last = left_node.value_count() - 1;
                    left_node.truncate(last)?;
                }
                {
                    let mut node_view = InteriorNodeMut::<K>::new(node.latch.as_bytes_mut())?;
                    node_view.insert_front(borrowed_child)?;
                    // The displaced first child's interval starts at the
                    // separator that used to sit in the parent.
                    node_view.set_key_at(1, old_separator)?;
                }
                InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?
                    .set_key_at(node_index, borrowed_key)?;
                self.set_child_parent(borrowed_child, node.page_id())?;
            }
        }
        left.guard.mark_dirty();
        node.guard.mark_dirty();
        parent_wl.guard.mark_dirty();
        Ok(())
    }

    /// Moves the right sibling's first entry to the end of `node` and
    /// refreshes the parent separator at `node_index + 1`.
    fn redistribute_from_right(
        &self,
        ctx: &mut MutContext,
        node: &mut WriteLatched,
        right: &mut WriteLatched,
        node_type: NodeType,
        node_index: usize,
    ) -> Result<()> {
        let parent_wl = ctx.stack.last_mut().expect("parent latched");
        match node_type {
            NodeType::Leaf => {
                let (key, rid, new_first) = {
                    let mut right_leaf = LeafNodeMut::<K>::new(right.latch.as_bytes_mut())?;
                    let entry = (right_leaf.key_at(0)?, right_leaf.rid_at(0)?);
                    right_leaf.remove_at(0)?;
                    (entry.0, entry.1, right_leaf.key_at(0)?)
                };
                {
                    let mut node_leaf = LeafNodeMut::<K>::new(node.latch.as_bytes_mut())?;
                    let count = node_leaf.key_count();
                    node_leaf.insert_at(count, key, rid)?;
                }
                InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?
                    .set_key_at(node_index + 1, new_first)?;
            }
            NodeType::Interior => {
                let separator = InteriorNode::<K>::new(parent_wl.latch.as_bytes())?
                    .key_at(node_index + 1)?;
                let (borrowed_child, new_separator) = {
                    let mut right_node = InteriorNodeMut::<K>::new(right.latch.as_bytes_mut())?;
                    let child = right_node.value_at(0)?;
                    let next_key = right_node.key_at(1)?;
                    right_node.remove_at(0)?;
                    (child, next_key)
                };
                {
                    let mut node_view = InteriorNodeMut::<K>::new(node.latch.as_bytes_mut())?;
                    node_view.push_back(separator, borrowed_child)?;
                }
                InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?
                    .set_key_at(node_index + 1, new_separator)?;
                self.set_child_parent(borrowed_child, node.page_id())?;
            }
        }
        node.guard.mark_dirty();
        right.guard.mark_dirty();
        parent_wl.guard.mark_dirty();
        Ok(())
    }

    /// Merges `right` into `left` (always right-into-left), removes the
    /// separator entry at `right_index` from the parent and recurses. The
    /// emptied right page is recycled once the latches drop.
    fn coalesce(
        &self,
        ctx: &mut MutContext,
        txn: &Transaction,
        mut left: WriteLatched,
        mut right: WriteLatched,
        node_type: NodeType,
        right_index: usize,
    ) -> Result<()> {
        match node_type {
            NodeType::Leaf => {
                let (moved, moved_count, right_next) = {
                    let right_leaf = LeafNode::<K>::new(right.latch.as_bytes())?;
                    let count = right_leaf.key_count();
                    (
                        right_leaf.raw_entries(0, count)?,
                        count,
                        right_leaf.next_page_id(),
                    )
                };
                let mut left_leaf = LeafNodeMut::<K>::new(left.latch.as_bytes_mut())?;
                left_leaf.append_raw(&moved, moved_count)?;
                left_leaf.set_next_page_id(right_next);
            }
            NodeType::Interior => {
                // Pull the separator down into the sentinel slot so the
                // merged children keep their interval semantics.
                let separator = {
                    let parent_wl = ctx.stack.last().expect("parent latched");
                    InteriorNode::<K>::new(parent_wl.latch.as_bytes())?.key_at(right_index)?
                };
                let (moved, moved_count, children) = {
                    let mut right_node = InteriorNodeMut::<K>::new(right.latch.as_bytes_mut())?;
                    right_node.set_key_at(0, separator)?;
                    let count = right_node.value_count();
                    (
                        right_node.raw_entries(0, count)?,
                        count,
                        right_node.child_ids()?,
                    )
                };
                InteriorNodeMut::<K>::new(left.latch.as_bytes_mut())?
                    .append_raw(&moved, moved_count)?;
                for child in children {
                    self.set_child_parent(child, left.page_id())?;
                }
            }
        }
        left.guard.mark_dirty();

        {
            let parent_wl = ctx.stack.last_mut().expect("parent latched");
            InteriorNodeMut::<K>::new(parent_wl.latch.as_bytes_mut())?.remove_at(right_index)?;
            parent_wl.guard.mark_dirty();
        }

        ctx.deleted.push(right.page_id());
        drop(right);
        drop(left);
        self.coalesce_or_redistribute(ctx, txn)
    }

    /// Handles removal reaching the root: an empty leaf root empties the
    /// tree; an interior root with a single child hands the tree to that
    /// child. Both update the catalog header page.
    fn adjust_root(
        &self,
        ctx: &mut MutContext,
        root_wl: WriteLatched,
        node_type: NodeType,
    ) -> Result<()> {
        match node_type {
            NodeType::Leaf => {
                let count = LeafNode::<K>::new(root_wl.latch.as_bytes())?.key_count();
                if count == 0 {
                    let root_guard = ctx
                        .root_guard
                        .as_mut()
                        .expect("emptying the tree requires the root mutex");
                    **root_guard = INVALID_PAGE_ID;
                    self.update_header_root(INVALID_PAGE_ID)?;
                    ctx.deleted.push(root_wl.page_id());
                }
            }
            NodeType::Interior => {
                let root_node = InteriorNode::<K>::new(root_wl.latch.as_bytes())?;
                if root_node.value_count() == 1 {
                    let child_id = root_node.value_at(0)?;
                    let root_guard = ctx
                        .root_guard
                        .as_mut()
                        .expect("shrinking the tree requires the root mutex");
                    **root_guard = child_id;
                    self.update_header_root(child_id)?;

                    let child_guard = self.bpm.fetch(child_id)?;
                    {
                        let mut child_latch = child_guard.write();
                        node::set_parent_page_id(child_latch.as_bytes_mut(), INVALID_PAGE_ID);
                    }
                    child_guard.mark_dirty();
                    ctx.deleted.push(root_wl.page_id());
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Iterator over every `(key, rid)` pair in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator<K>> {
        self.start_iterator(None)
    }

    /// Iterator starting at `key` (or the next larger key when absent).
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>> {
        self.start_iterator(Some(key))
    }

    fn start_iterator(&self, key: Option<&K>) -> Result<TreeIterator<K>> {
        let root_id = *self.root.lock();
        if root_id == INVALID_PAGE_ID {
            return Ok(TreeIterator::empty(self.bpm.clone()));
        }

        let mut guard = self.bpm.fetch(root_id)?;
        let mut latch = guard.read();
        loop {
            match node::node_type(latch.as_bytes())? {
                NodeType::Leaf => {
                    let index = match key {
                        Some(key) => LeafNode::<K>::new(latch.as_bytes())?.lower_bound(key)?,
                        None => 0,
                    };
                    return Ok(TreeIterator::new(self.bpm.clone(), guard, latch, index));
                }
                NodeType::Interior => {
                    let interior = InteriorNode::<K>::new(latch.as_bytes())?;
                    let child = match key {
                        Some(key) => interior.lookup(key)?,
                        None => interior.value_at(0)?,
                    };
                    let child_guard = self.bpm.fetch(child)?;
                    let child_latch = child_guard.read();
                    latch = child_latch;
                    guard = child_guard;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn set_child_parent(&self, child: PageId, parent: PageId) -> Result<()> {
        let guard = self.bpm.fetch(child)?;
        {
            let mut latch = guard.write();
            node::set_parent_page_id(latch.as_bytes_mut(), parent);
        }
        guard.mark_dirty();
        Ok(())
    }

    /// Records the current root in the catalog header page (insert on
    /// first registration, update afterwards).
    fn update_header_root(&self, root_id: PageId) -> Result<()> {
        let guard = self.bpm.fetch(HEADER_PAGE_ID)?;
        {
            let mut latch = guard.write();
            let mut header = HeaderViewMut::new(latch.as_bytes_mut());
            if !header.update_record(&self.name, root_id)? {
                ensure!(
                    header.insert_record(&self.name, root_id)?,
                    "catalog record for {:?} appeared concurrently",
                    self.name
                );
            }
        }
        guard.mark_dirty();
        Ok(())
    }
}

impl<K: IndexKey> std::fmt::Debug for BPlusTree<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("root", &*self.root.lock())
            .finish()
    }
}
