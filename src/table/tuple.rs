//! # Record Identifiers and Tuples
//!
//! A [`Rid`] names a tuple by `(page_id, slot)`. It is stable for the
//! tuple's lifetime - compaction within a page moves tuple bodies but never
//! renumbers slots - and doubles as the value type of B+tree leaves and the
//! key of the lock table, so it is `Copy`, hashable, ordered and exactly
//! eight little-endian bytes on disk.
//!
//! A [`Tuple`] is an owned, schema-free byte payload plus the `Rid` it was
//! read from (or will be written to). Schema interpretation lives outside
//! the storage engine.

use zerocopy::little_endian::I32 as I32le;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::PageId;

/// On-disk size of a [`Rid`].
pub const RID_SIZE: usize = 8;

#[repr(C)]
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
pub struct Rid {
    page_id: I32le,
    slot: I32le,
}

impl Rid {
    pub fn new(page_id: PageId, slot: i32) -> Self {
        Self {
            page_id: I32le::new(page_id),
            slot: I32le::new(slot),
        }
    }

    /// The `(INVALID_PAGE_ID, -1)` sentinel, used as the end-of-table marker.
    pub fn invalid() -> Self {
        Self::new(crate::config::INVALID_PAGE_ID, -1)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.get()
    }

    pub fn slot(&self) -> i32 {
        self.slot.get()
    }

    pub fn is_valid(&self) -> bool {
        self.page_id.get() != crate::config::INVALID_PAGE_ID && self.slot.get() >= 0
    }
}

impl std::fmt::Debug for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rid({}, {})", self.page_id.get(), self.slot.get())
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    rid: Rid,
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            rid: Rid::invalid(),
            data,
        }
    }

    pub fn with_rid(rid: Rid, data: Vec<u8>) -> Self {
        Self { rid, data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Rid) {
        self.rid = rid;
    }
}

impl std::fmt::Debug for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuple")
            .field("rid", &self.rid)
            .field("size", &self.data.len())
            .finish()
    }
}
