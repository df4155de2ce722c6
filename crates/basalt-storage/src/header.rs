//! Header page: the persistent `index_name -> root_page_id` record table.
//!
//! Page 0 of the data file. Each index records the page id of its root here
//! and rewrites the record whenever the root changes, so an index can be
//! reopened after a restart.

use basalt_common::page::{PageId, PAGE_SIZE};

/// Maximum length of an index name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Record layout: name padded to MAX_NAME_LEN, then the root page id.
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;

/// Records start after the u32 record count.
const RECORDS_OFFSET: usize = 4;

/// Maximum number of records a header page can hold.
pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_offset(i: usize) -> usize {
    RECORDS_OFFSET + i * RECORD_SIZE
}

fn name_matches(stored: &[u8], name: &str) -> bool {
    let bytes = name.as_bytes();
    stored[..bytes.len()] == *bytes && stored[bytes.len()..].iter().all(|&b| b == 0)
}

/// Read-only view over a header page.
pub struct HeaderView<'a> {
    data: &'a [u8],
}

impl<'a> HeaderView<'a> {
    /// Lays the view over the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of records stored.
    pub fn record_count(&self) -> usize {
        u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]) as usize
    }

    fn find(&self, name: &str) -> Option<usize> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return None;
        }
        (0..self.record_count()).find(|&i| {
            let off = record_offset(i);
            name_matches(&self.data[off..off + MAX_NAME_LEN], name)
        })
    }

    /// Returns the recorded root page id for an index, if present.
    pub fn root_of(&self, name: &str) -> Option<PageId> {
        let i = self.find(name)?;
        let off = record_offset(i) + MAX_NAME_LEN;
        Some(PageId(u32::from_le_bytes([
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ])))
    }
}

/// Mutable view over a header page.
pub struct HeaderViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderViewMut<'a> {
    /// Lays the view over the page bytes.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Read-only view over the same bytes.
    pub fn as_ref(&self) -> HeaderView<'_> {
        HeaderView::new(self.data)
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[..4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, i: usize, name: &str, root: PageId) {
        let off = record_offset(i);
        self.data[off..off + MAX_NAME_LEN].fill(0);
        self.data[off..off + name.len()].copy_from_slice(name.as_bytes());
        self.data[off + MAX_NAME_LEN..off + RECORD_SIZE].copy_from_slice(&root.0.to_le_bytes());
    }

    /// Adds a record. Returns false if the name is invalid, already
    /// recorded, or the page is full.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return false;
        }
        let count = self.as_ref().record_count();
        if count >= MAX_RECORDS || self.as_ref().find(name).is_some() {
            return false;
        }
        self.write_record(count, name, root);
        self.set_record_count(count + 1);
        true
    }

    /// Rewrites an existing record. Returns false if the name is absent.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.as_ref().find(name) {
            Some(i) => {
                self.write_record(i, name, root);
                true
            }
            None => false,
        }
    }

    /// Removes a record. Returns false if the name is absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(i) = self.as_ref().find(name) else {
            return false;
        };
        let count = self.as_ref().record_count();
        self.data
            .copy_within(record_offset(i + 1)..record_offset(count), record_offset(i));
        self.set_record_count(count - 1);
        true
    }
}
