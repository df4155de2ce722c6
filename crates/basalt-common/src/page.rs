//! Page identifiers and constants for BasaltDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// The header page: page 0 of every data file. It stores the
/// `index_name -> root_page_id` record table and is never handed out
/// by the page allocator.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Unique identifier for a page within the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Returns true if this is a valid page ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Byte offset of this page within the data file.
    pub fn offset(&self) -> u64 {
        (self.0 as u64) * (PAGE_SIZE as u64)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

/// Page types in BasaltDB storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated/zeroed page.
    Invalid = 0,
    /// The header page holding index root records.
    Header = 1,
    /// B+ tree leaf page.
    BTreeLeaf = 2,
    /// B+ tree internal page.
    BTreeInternal = 3,
}

impl PageType {
    /// Decodes a page-type tag. Unknown tags decode to `Invalid`.
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => PageType::Header,
            2 => PageType::BTreeLeaf,
            3 => PageType::BTreeInternal,
            _ => PageType::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(0).is_valid());
        assert!(PageId(123).is_valid());
        assert!(!PageId::INVALID.is_valid());
    }

    #[test]
    fn test_page_id_offset() {
        assert_eq!(PageId(0).offset(), 0);
        assert_eq!(PageId(1).offset(), PAGE_SIZE as u64);
        assert_eq!(PageId(10).offset(), 10 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(5).to_string(), "page:5");
        assert_eq!(PageId::INVALID.to_string(), "page:invalid");
    }

    #[test]
    fn test_header_page_id() {
        assert_eq!(HEADER_PAGE_ID, PageId(0));
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_type_repr() {
        assert_eq!(PageType::Invalid as u8, 0);
        assert_eq!(PageType::Header as u8, 1);
        assert_eq!(PageType::BTreeLeaf as u8, 2);
        assert_eq!(PageType::BTreeInternal as u8, 3);
    }

    #[test]
    fn test_page_type_from_u8() {
        assert_eq!(PageType::from_u8(1), PageType::Header);
        assert_eq!(PageType::from_u8(2), PageType::BTreeLeaf);
        assert_eq!(PageType::from_u8(3), PageType::BTreeInternal);
        assert_eq!(PageType::from_u8(0), PageType::Invalid);
        assert_eq!(PageType::from_u8(200), PageType::Invalid);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
