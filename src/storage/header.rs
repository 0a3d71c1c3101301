//! # Catalog Header Page
//!
//! Page 0 of the database file maps table and index names to their first /
//! root page. The layout is a counted array of fixed-width records:
//!
//! ```text
//! Offset      Size  Field
//! ------      ----  -------------------------------
//! 0           4     record_count
//! 4 + i*36    32    name (NUL-padded UTF-8, < 32 bytes)
//! 36 + i*36   4     root_page_id
//! ```
//!
//! Creating a table or an index registers a record here; a B+tree updates
//! its record whenever its root page changes so the tree can be reopened by
//! name. Names are unique.
//!
//! The views borrow page bytes and perform no synchronization; callers hold
//! the header frame's latch.

use eyre::{ensure, Result};

use crate::config::{PageId, PAGE_SIZE};
use crate::storage::page::{read_i32, write_i32};

pub const HEADER_RECORD_SIZE: usize = 36;
pub const HEADER_NAME_SIZE: usize = 32;
pub const HEADER_MAX_RECORDS: usize = (PAGE_SIZE - 4) / HEADER_RECORD_SIZE;

pub struct HeaderView<'a> {
    data: &'a [u8],
}

impl<'a> HeaderView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_i32(self.data, 0).max(0) as usize
    }

    pub fn name_at(&self, index: usize) -> &str {
        let offset = 4 + index * HEADER_RECORD_SIZE;
        let raw = &self.data[offset..offset + HEADER_NAME_SIZE];
        let len = raw.iter().position(|&b| b == 0).unwrap_or(HEADER_NAME_SIZE);
        std::str::from_utf8(&raw[..len]).unwrap_or("")
    }

    pub fn root_at(&self, index: usize) -> PageId {
        let offset = 4 + index * HEADER_RECORD_SIZE + HEADER_NAME_SIZE;
        read_i32(self.data, offset)
    }

    pub fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.name_at(i) == name)
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|i| self.root_at(i))
    }
}

pub struct HeaderViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderViewMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    fn view(&self) -> HeaderView<'_> {
        HeaderView::new(self.data)
    }

    pub fn record_count(&self) -> usize {
        self.view().record_count()
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.view().get_root_id(name)
    }

    fn set_record_count(&mut self, count: usize) {
        write_i32(self.data, 0, count as i32);
    }

    /// Registers `name -> root_id`. Returns `Ok(false)` if the name is
    /// already present.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> Result<bool> {
        ensure!(
            name.len() < HEADER_NAME_SIZE,
            "catalog name {:?} exceeds {} bytes",
            name,
            HEADER_NAME_SIZE - 1
        );
        let count = self.record_count();
        ensure!(
            count < HEADER_MAX_RECORDS,
            "catalog header page is full ({} records)",
            count
        );

        if self.view().find_record(name).is_some() {
            return Ok(false);
        }

        let offset = 4 + count * HEADER_RECORD_SIZE;
        self.data[offset..offset + HEADER_NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        write_i32(self.data, offset + HEADER_NAME_SIZE, root_id);
        self.set_record_count(count + 1);
        Ok(true)
    }

    /// Rewrites the root page id of an existing record. Returns false when
    /// the name is unknown.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> Result<bool> {
        ensure!(
            name.len() < HEADER_NAME_SIZE,
            "catalog name {:?} exceeds {} bytes",
            name,
            HEADER_NAME_SIZE - 1
        );
        let Some(index) = self.view().find_record(name) else {
            return Ok(false);
        };
        let offset = 4 + index * HEADER_RECORD_SIZE + HEADER_NAME_SIZE;
        write_i32(self.data, offset, root_id);
        Ok(true)
    }

    /// Removes a record, compacting the tail. Returns false when the name
    /// is unknown.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.view().find_record(name) else {
            return false;
        };
        let count = self.record_count();
        let offset = 4 + index * HEADER_RECORD_SIZE;
        let tail_start = offset + HEADER_RECORD_SIZE;
        let tail_end = 4 + count * HEADER_RECORD_SIZE;
        self.data.copy_within(tail_start..tail_end, offset);
        self.set_record_count(count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn insert_and_lookup() {
        let mut data = page();
        let mut header = HeaderViewMut::new(&mut data);

        assert!(header.insert_record("orders", 3).unwrap());
        assert!(header.insert_record("orders_pk", 7).unwrap());
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("orders"), Some(3));
        assert_eq!(header.get_root_id("orders_pk"), Some(7));
        assert_eq!(header.get_root_id("missing"), None);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut data = page();
        let mut header = HeaderViewMut::new(&mut data);

        assert!(header.insert_record("t", 1).unwrap());
        assert!(!header.insert_record("t", 2).unwrap());
        assert_eq!(header.get_root_id("t"), Some(1));
    }

    #[test]
    fn update_rewrites_root_only() {
        let mut data = page();
        let mut header = HeaderViewMut::new(&mut data);

        header.insert_record("idx", 5).unwrap();
        assert!(header.update_record("idx", 9).unwrap());
        assert_eq!(header.get_root_id("idx"), Some(9));
        assert!(!header.update_record("nope", 1).unwrap());
    }

    #[test]
    fn delete_compacts_tail() {
        let mut data = page();
        let mut header = HeaderViewMut::new(&mut data);

        header.insert_record("a", 1).unwrap();
        header.insert_record("b", 2).unwrap();
        header.insert_record("c", 3).unwrap();

        assert!(header.delete_record("b"));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_id("a"), Some(1));
        assert_eq!(header.get_root_id("c"), Some(3));
        assert_eq!(header.get_root_id("b"), None);
    }

    #[test]
    fn overlong_name_is_an_error() {
        let mut data = page();
        let mut header = HeaderViewMut::new(&mut data);
        let long = "x".repeat(HEADER_NAME_SIZE);
        assert!(header.insert_record(&long, 1).is_err());
    }

    #[test]
    fn invalid_root_can_be_stored_by_update() {
        // A B+tree that shrinks to empty records INVALID_PAGE_ID.
        let mut data = page();
        let mut header = HeaderViewMut::new(&mut data);
        header.insert_record("idx", 4).unwrap();
        header.update_record("idx", -1).unwrap();
        assert_eq!(header.get_root_id("idx"), Some(-1));
    }
}
