//! # Range Iterator
//!
//! Walks the leaf list in ascending key order. The iterator owns a pin and
//! a read latch on its current leaf; stepping past the last entry acquires
//! the successor's read latch *before* releasing the current one
//! (hand-over-hand), so a concurrent coalesce can never unlink the leaf out
//! from under the iterator unobserved.

use std::marker::PhantomData;

use eyre::Result;

use crate::btree::key::IndexKey;
use crate::btree::leaf::LeafNode;
use crate::buffer::{BufferPoolManager, PageGuard, PageReadGuard};
use crate::config::INVALID_PAGE_ID;
use crate::table::Rid;

pub struct TreeIterator<K: IndexKey> {
    bpm: BufferPoolManager,
    /// Pin + read latch on the current leaf; `None` once exhausted.
    /// Latch before guard so the drop order is unlatch, then unpin.
    current: Option<(PageReadGuard, PageGuard)>,
    index: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> TreeIterator<K> {
    pub(crate) fn new(
        bpm: BufferPoolManager,
        guard: PageGuard,
        latch: PageReadGuard,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            current: Some((latch, guard)),
            index,
            _key: PhantomData,
        }
    }

    pub(crate) fn empty(bpm: BufferPoolManager) -> Self {
        Self {
            bpm,
            current: None,
            index: 0,
            _key: PhantomData,
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = Result<(K, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (latch, _guard) = self.current.as_ref()?;
            let leaf = match LeafNode::<K>::new(latch.as_bytes()) {
                Ok(leaf) => leaf,
                Err(err) => {
                    self.current = None;
                    return Some(Err(err));
                }
            };

            if self.index < leaf.key_count() {
                let entry = leaf
                    .key_at(self.index)
                    .and_then(|key| Ok((key, leaf.rid_at(self.index)?)));
                self.index += 1;
                return Some(entry);
            }

            let next = leaf.next_page_id();
            if next == INVALID_PAGE_ID {
                self.current = None;
                return None;
            }

            // Hand over hand: pin and latch the successor before letting
            // go of the current leaf.
            let next_guard = match self.bpm.fetch(next) {
                Ok(guard) => guard,
                Err(err) => {
                    self.current = None;
                    return Some(Err(err));
                }
            };
            let next_latch = next_guard.read();
            self.current = Some((next_latch, next_guard));
            self.index = 0;
        }
    }
}
