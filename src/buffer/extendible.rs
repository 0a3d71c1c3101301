//! # Extendible Hash Table
//!
//! The in-memory `page_id -> frame` map behind the buffer pool. A directory
//! of `2^D` slots (global depth `D`) points at buckets, each with a local
//! depth `d <= D`; slots `i` and `j` reference the same bucket iff they
//! agree in their low `d` bits.
//!
//! ## Split Algorithm
//!
//! Inserting into a full bucket:
//!
//! 1. Increment the bucket's local depth and create a sibling at the same
//!    new depth.
//! 2. Redistribute entries between the two by the next hash bit. If every
//!    entry lands on one side, deepen again until the split is non-trivial.
//! 3. If the new local depth exceeds `D`, double the directory (by
//!    `2^(d - D)`), promote `D`, and rebuild the new slots from the old
//!    ones (`slot i` inherits `slot i mod old_len`).
//! 4. Repoint only the slots whose low `d` bits select the sibling.
//!
//! ```text
//! D = 2             split bucket 01 (d=2 -> d=3)
//! ┌────┐                         ┌────┐
//! │ 00 │──> A                    │ 000│──> A
//! │ 01 │──> B          ===>      │ 001│──> B        (bit 2 == 0)
//! │ 10 │──> A                    │ ...│
//! │ 11 │──> C                    │ 101│──> B'       (bit 2 == 1)
//! └────┘                         └────┘
//! ```
//!
//! ## Concurrency
//!
//! One internal mutex guards the directory and all buckets. The buffer pool
//! serializes through its own manager mutex anyway; the internal lock keeps
//! the table independently usable.

use std::hash::{BuildHasher, Hash};

use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::Mutex;

/// A bucket may be forced past `bucket_size` when deepening cannot separate
/// colliding keys; this bounds the depth a pathological hash can reach.
const MAX_DEPTH: u32 = 24;

struct Bucket<K, V> {
    depth: u32,
    items: HashMap<K, V>,
}

struct TableInner<K, V> {
    global_depth: u32,
    /// `directory[slot]` is an index into `buckets`; several slots may share
    /// one bucket.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    len: usize,
    hasher: DefaultHashBuilder,
}

pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<TableInner<K, V>>,
}

impl<K: Hash + Eq + Copy, V: Copy> ExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            inner: Mutex::new(TableInner {
                global_depth: 0,
                directory: vec![0],
                buckets: vec![Bucket {
                    depth: 0,
                    items: HashMap::new(),
                }],
                len: 0,
                hasher: DefaultHashBuilder::default(),
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let slot = slot_of(&inner, key);
        inner.buckets[inner.directory[slot]].items.get(key).copied()
    }

    /// Inserts or overwrites `key -> value`, splitting buckets as needed.
    pub fn insert(&self, key: K, value: V) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        loop {
            let slot = slot_of(inner, &key);
            let bucket_idx = inner.directory[slot];
            let bucket = &mut inner.buckets[bucket_idx];

            if let Some(existing) = bucket.items.get_mut(&key) {
                *existing = value;
                return;
            }
            if bucket.items.len() < self.bucket_size || bucket.depth >= MAX_DEPTH {
                bucket.items.insert(key, value);
                inner.len += 1;
                return;
            }

            split_bucket(inner, bucket_idx);
        }
    }

    /// Removes `key`; returns whether it was present. Buckets are never
    /// merged back.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let slot = slot_of(&inner, key);
        let bucket_idx = inner.directory[slot];
        let removed = inner.buckets[bucket_idx].items.remove(key).is_some();
        if removed {
            inner.len -= 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Local depth of the bucket that `key` currently hashes to.
    pub fn local_depth(&self, key: &K) -> u32 {
        let inner = self.inner.lock();
        let slot = slot_of(&inner, key);
        inner.buckets[inner.directory[slot]].depth
    }
}

fn slot_of<K: Hash, V>(inner: &TableInner<K, V>, key: &K) -> usize {
    let hash = inner.hasher.hash_one(key);
    (hash as usize) & ((1usize << inner.global_depth) - 1)
}

fn split_bucket<K: Hash + Eq + Copy, V: Copy>(inner: &mut TableInner<K, V>, bucket_idx: usize) {
    let new_depth = inner.buckets[bucket_idx].depth + 1;
    inner.buckets[bucket_idx].depth = new_depth;

    // Redistribute by the newly significant hash bit.
    let bit = 1u64 << (new_depth - 1);
    let hasher = inner.hasher.clone();
    let (kept, moved): (Vec<(K, V)>, Vec<(K, V)>) = inner.buckets[bucket_idx]
        .items
        .drain()
        .partition(|(k, _)| hasher.hash_one(k) & bit == 0);
    inner.buckets[bucket_idx].items = kept.into_iter().collect();

    let sibling_idx = inner.buckets.len();
    inner.buckets.push(Bucket {
        depth: new_depth,
        items: moved.into_iter().collect(),
    });

    // Grow the directory if the bucket outgrew it; new slots inherit the
    // mapping of their low-bits alias.
    if new_depth > inner.global_depth {
        let old_len = inner.directory.len();
        let factor = 1usize << (new_depth - inner.global_depth);
        let mut grown = Vec::with_capacity(old_len * factor);
        grown.extend_from_slice(&inner.directory);
        for i in old_len..old_len * factor {
            grown.push(inner.directory[i & (old_len - 1)]);
        }
        inner.directory = grown;
        inner.global_depth = new_depth;
    }

    // Repoint every slot that selects the sibling by its low `new_depth` bits.
    let mask = (1usize << new_depth) - 1;
    let sibling_bit = 1usize << (new_depth - 1);
    for slot in 0..inner.directory.len() {
        if inner.directory[slot] == bucket_idx && slot & mask & sibling_bit != 0 {
            inner.directory[slot] = sibling_idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_remove() {
        let table = ExtendibleHashTable::new(50);
        table.insert(1, 10);
        table.insert(2, 20);

        assert_eq!(table.find(&1), Some(10));
        assert_eq!(table.find(&2), Some(20));
        assert_eq!(table.find(&3), None);

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_overwrites() {
        let table = ExtendibleHashTable::new(50);
        table.insert(7, 1);
        table.insert(7, 2);
        assert_eq!(table.find(&7), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn splits_grow_the_directory() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..64 {
            table.insert(i, i);
        }
        assert!(table.global_depth() > 0);
        assert!(table.bucket_count() > 1);
        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i), "key {} lost in split", i);
        }
    }

    #[test]
    fn local_depth_never_exceeds_global() {
        let table = ExtendibleHashTable::new(2);
        for i in 0..256 {
            table.insert(i, i);
            assert!(table.local_depth(&i) <= table.global_depth());
        }
    }

    #[test]
    fn ten_thousand_keys_survive() {
        let table = ExtendibleHashTable::new(50);
        for i in 0..10_000i64 {
            table.insert(i, i * 2);
        }
        assert_eq!(table.len(), 10_000);
        for i in 0..10_000i64 {
            assert_eq!(table.find(&i), Some(i * 2));
        }
    }

    #[test]
    fn removal_then_reinsert() {
        let table = ExtendibleHashTable::new(4);
        for i in 0..100 {
            table.insert(i, i);
        }
        for i in (0..100).step_by(2) {
            assert!(table.remove(&i));
        }
        for i in (0..100).step_by(2) {
            table.insert(i, -i);
        }
        for i in 0..100 {
            let want = if i % 2 == 0 { -i } else { i };
            assert_eq!(table.find(&i), Some(want));
        }
    }
}
