//! # Page Buffer
//!
//! A `Page` is a fixed 4KB byte buffer, the unit of caching and I/O. Every
//! page, regardless of what lives in it, carries the same 8-byte prefix:
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  ----------------------------------------
//! 0       4     page_id   Identity of the page (little-endian i32)
//! 4       4     lsn       LSN of the most recent update to this page
//! ```
//!
//! Typed interpretations of the remaining bytes (slotted table page, B+tree
//! leaf/interior node, catalog header page) are provided by view structs in
//! their respective modules; this type only owns the bytes and the common
//! prefix accessors.
//!
//! ## Thread Safety
//!
//! `Page` has no synchronization of its own. The buffer pool wraps each page
//! in an `Arc<RwLock<Page>>` - the per-frame reader/writer latch - and
//! controls all access through pinned guards.

use crate::config::{Lsn, PageId, PAGE_SIZE};

pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Zeroes the whole buffer.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    pub fn page_id(&self) -> PageId {
        read_i32(&self.data[..], 0)
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        write_i32(&mut self.data[..], 0, page_id);
    }

    pub fn lsn(&self) -> Lsn {
        read_i32(&self.data[..], 4)
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        write_i32(&mut self.data[..], 4, lsn);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("lsn", &self.lsn())
            .finish()
    }
}

/// Reads a little-endian i32 at `offset`. Panics if out of bounds, which
/// indicates a caller bug: offsets into a page are always derived from
/// compile-time layout constants.
pub fn read_i32(data: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    i32::from_le_bytes(buf)
}

pub fn write_i32(data: &mut [u8], offset: usize, value: i32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{INVALID_LSN, INVALID_PAGE_ID};

    #[test]
    fn new_page_is_zeroed() {
        let page = Page::new();
        assert!(page.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(page.page_id(), 0);
        assert_eq!(page.lsn(), 0);
    }

    #[test]
    fn prefix_roundtrip() {
        let mut page = Page::new();
        page.set_page_id(42);
        page.set_lsn(7);

        assert_eq!(page.page_id(), 42);
        assert_eq!(page.lsn(), 7);
        assert_eq!(&page.as_bytes()[0..4], &42i32.to_le_bytes());
        assert_eq!(&page.as_bytes()[4..8], &7i32.to_le_bytes());
    }

    #[test]
    fn reset_clears_prefix() {
        let mut page = Page::new();
        page.set_page_id(9);
        page.reset();
        assert_eq!(page.page_id(), 0);
    }

    #[test]
    fn negative_ids_roundtrip() {
        let mut page = Page::new();
        page.set_page_id(INVALID_PAGE_ID);
        page.set_lsn(INVALID_LSN);
        assert_eq!(page.page_id(), -1);
        assert_eq!(page.lsn(), -1);
    }
}
