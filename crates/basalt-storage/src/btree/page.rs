//! B+Tree page layouts: typed views over a latched frame's bytes.
//!
//! Both page shapes share a common header, little-endian:
//!
//! ```text
//! offset  0: page_type     u8   (+3 bytes reserved)
//! offset  4: lsn           u32
//! offset  8: size          u32  (leaf: record count; internal: child count)
//! offset 12: max_size      u32
//! offset 16: page_id       u32
//! ```
//!
//! A leaf continues with `next_page_id: u32` and a packed array of
//! fixed-width `(key, value)` records. An internal page continues directly
//! with a packed array of `(key, child_page_id)` records whose record 0
//! carries a valid child but a ghost key that is never compared.
//!
//! The views borrow the page bytes, which are only reachable through a
//! frame's latch guard, so a view can never outlive the latch.

use super::key::{IndexKey, IndexValue};
use basalt_common::page::{PageId, PageType, PAGE_SIZE};
use std::marker::PhantomData;

const PAGE_TYPE_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PAGE_ID_OFFSET: usize = 16;
const COMMON_HEADER_SIZE: usize = 20;

const NEXT_PAGE_ID_OFFSET: usize = COMMON_HEADER_SIZE;
const LEAF_HEADER_SIZE: usize = COMMON_HEADER_SIZE + 4;
const INTERNAL_HEADER_SIZE: usize = COMMON_HEADER_SIZE;

/// Child pointer width inside internal records.
const CHILD_SIZE: usize = 4;

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads the page-type tag.
pub fn page_type_of(data: &[u8]) -> PageType {
    PageType::from_u8(data[PAGE_TYPE_OFFSET])
}

/// Reads the size field (leaf record count / internal child count).
pub fn size_of(data: &[u8]) -> u32 {
    read_u32(data, SIZE_OFFSET)
}

/// Reads the max-size field.
pub fn max_size_of(data: &[u8]) -> u32 {
    read_u32(data, MAX_SIZE_OFFSET)
}

/// Reads the page id field.
pub fn page_id_of(data: &[u8]) -> PageId {
    PageId(read_u32(data, PAGE_ID_OFFSET))
}

/// Maximum leaf fan-out for the given key/value widths.
pub fn leaf_capacity<K: IndexKey, V: IndexValue>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

/// Maximum internal fan-out (children) for the given key width.
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_SIZE + CHILD_SIZE)
}

fn write_common_header(data: &mut [u8], page_type: PageType, page_id: PageId, max_size: u32) {
    data[..COMMON_HEADER_SIZE].fill(0);
    data[PAGE_TYPE_OFFSET] = page_type as u8;
    write_u32(data, LSN_OFFSET, 0);
    write_u32(data, SIZE_OFFSET, 0);
    write_u32(data, MAX_SIZE_OFFSET, max_size);
    write_u32(data, PAGE_ID_OFFSET, page_id.0);
}

// ---------------------------------------------------------------------------
// Leaf pages
// ---------------------------------------------------------------------------

/// Read view over a leaf page.
pub struct LeafRef<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> LeafRef<'a, K, V> {
    /// Lays the view over the bytes. Panics if the page is not a leaf.
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(
            page_type_of(data),
            PageType::BTreeLeaf,
            "{} is not a leaf page",
            page_id_of(data)
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn record_size() -> usize {
        K::ENCODED_SIZE + V::ENCODED_SIZE
    }

    #[inline]
    fn record_offset(i: usize) -> usize {
        LEAF_HEADER_SIZE + i * Self::record_size()
    }

    /// Number of records.
    pub fn size(&self) -> usize {
        size_of(self.data) as usize
    }

    /// Maximum number of records.
    pub fn max_size(&self) -> usize {
        max_size_of(self.data) as usize
    }

    /// Minimum record count for a non-root leaf.
    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    /// This page's id.
    pub fn page_id(&self) -> PageId {
        page_id_of(self.data)
    }

    /// The next leaf in the left-to-right chain, `PageId::INVALID` at the end.
    pub fn next_page_id(&self) -> PageId {
        PageId(read_u32(self.data, NEXT_PAGE_ID_OFFSET))
    }

    /// Key of record `i`.
    pub fn key_at(&self, i: usize) -> K {
        debug_assert!(i < self.size());
        K::decode(&self.data[Self::record_offset(i)..])
    }

    /// Value of record `i`.
    pub fn value_at(&self, i: usize) -> V {
        debug_assert!(i < self.size());
        V::decode(&self.data[Self::record_offset(i) + K::ENCODED_SIZE..])
    }

    /// Binary search. `Ok(i)` when the key is at record `i`, `Err(i)` with
    /// the insertion point otherwise.
    pub fn find_index(&self, key: &K) -> std::result::Result<usize, usize> {
        let mut low = 0usize;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Err(low)
    }

    /// Point lookup.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.find_index(key).ok().map(|i| self.value_at(i))
    }
}

/// Write view over a leaf page.
pub struct LeafMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> LeafMut<'a, K, V> {
    /// Lays the view over the bytes. Panics if the page is not a leaf.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(
            page_type_of(data),
            PageType::BTreeLeaf,
            "{} is not a leaf page",
            page_id_of(data)
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Formats the bytes as an empty leaf and returns the view.
    pub fn init(data: &'a mut [u8], page_id: PageId, max_size: u32) -> Self {
        debug_assert!(max_size as usize <= leaf_capacity::<K, V>());
        write_common_header(data, PageType::BTreeLeaf, page_id, max_size);
        write_u32(data, NEXT_PAGE_ID_OFFSET, PageId::INVALID.0);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read view over the same bytes.
    pub fn as_ref(&self) -> LeafRef<'_, K, V> {
        LeafRef {
            data: self.data,
            _marker: PhantomData,
        }
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.data, SIZE_OFFSET, size as u32);
    }

    /// Updates the next-leaf pointer.
    pub fn set_next_page_id(&mut self, next: PageId) {
        write_u32(self.data, NEXT_PAGE_ID_OFFSET, next.0);
    }

    fn write_record(&mut self, i: usize, key: K, value: V) {
        let off = LeafRef::<K, V>::record_offset(i);
        key.encode(&mut self.data[off..]);
        value.encode(&mut self.data[off + K::ENCODED_SIZE..]);
    }

    /// Sorted insert. The caller checks fullness and duplicates first.
    pub fn insert(&mut self, key: K, value: V) {
        let view = self.as_ref();
        let size = view.size();
        debug_assert!(size < view.max_size(), "insert into a full leaf");
        let idx = match view.find_index(&key) {
            Ok(_) => {
                debug_assert!(false, "duplicate key inserted into leaf");
                return;
            }
            Err(i) => i,
        };
        let rs = LeafRef::<K, V>::record_size();
        let start = LeafRef::<K, V>::record_offset(idx);
        let end = LeafRef::<K, V>::record_offset(size);
        self.data.copy_within(start..end, start + rs);
        self.write_record(idx, key, value);
        self.set_size(size + 1);
    }

    /// Splits a full leaf: the upper records move into `new_leaf`, the
    /// pending `(key, value)` lands in whichever half its ordering dictates,
    /// and the leaf chain is stitched with the new leaf fully initialized
    /// before this leaf links to it. The pivot accounts for where the key
    /// lands, so both halves end at or above the minimum. Returns the
    /// separator (the new leaf's smallest key).
    pub fn insert_and_split(&mut self, key: K, value: V, new_leaf: &mut LeafMut<'_, K, V>) -> K {
        let size = self.as_ref().size();
        let total = size + 1;
        let left = total - total / 2;
        let idx = match self.as_ref().find_index(&key) {
            Ok(_) => {
                debug_assert!(false, "duplicate key in leaf split");
                0
            }
            Err(i) => i,
        };
        let pivot = if idx < left { left - 1 } else { left };

        let start = LeafRef::<K, V>::record_offset(pivot);
        let end = LeafRef::<K, V>::record_offset(size);
        new_leaf.data[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + (end - start)]
            .copy_from_slice(&self.data[start..end]);
        new_leaf.set_size(size - pivot);
        self.set_size(pivot);

        new_leaf.set_next_page_id(self.as_ref().next_page_id());
        self.set_next_page_id(new_leaf.as_ref().page_id());

        if idx < left {
            self.insert(key, value);
        } else {
            new_leaf.insert(key, value);
        }
        new_leaf.as_ref().key_at(0)
    }

    /// Removes a key. Returns false if it is absent.
    pub fn delete(&mut self, key: &K) -> bool {
        let view = self.as_ref();
        let size = view.size();
        let Ok(idx) = view.find_index(key) else {
            return false;
        };
        let start = LeafRef::<K, V>::record_offset(idx + 1);
        let end = LeafRef::<K, V>::record_offset(size);
        let rs = LeafRef::<K, V>::record_size();
        self.data.copy_within(start..end, start - rs);
        self.set_size(size - 1);
        true
    }

    /// Removes and returns the last record.
    pub fn pop_back(&mut self) -> (K, V) {
        let view = self.as_ref();
        let size = view.size();
        debug_assert!(size > 0);
        let record = (view.key_at(size - 1), view.value_at(size - 1));
        self.set_size(size - 1);
        record
    }

    /// Removes and returns the first record.
    pub fn pop_front(&mut self) -> (K, V) {
        let view = self.as_ref();
        let size = view.size();
        debug_assert!(size > 0);
        let record = (view.key_at(0), view.value_at(0));
        let start = LeafRef::<K, V>::record_offset(1);
        let end = LeafRef::<K, V>::record_offset(size);
        let rs = LeafRef::<K, V>::record_size();
        self.data.copy_within(start..end, start - rs);
        self.set_size(size - 1);
        record
    }

    /// Appends every record of `src`. The caller guarantees `src`'s keys
    /// all sort after this leaf's keys and that the union fits.
    pub fn extend_from(&mut self, src: &LeafRef<'_, K, V>) {
        let size = self.as_ref().size();
        let extra = src.size();
        debug_assert!(size + extra <= self.as_ref().max_size());
        let dst_start = LeafRef::<K, V>::record_offset(size);
        let src_start = LeafRef::<K, V>::record_offset(0);
        let src_end = LeafRef::<K, V>::record_offset(extra);
        self.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&src.data[src_start..src_end]);
        self.set_size(size + extra);
    }
}

// ---------------------------------------------------------------------------
// Internal pages
// ---------------------------------------------------------------------------

/// Read view over an internal page.
pub struct InternalRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalRef<'a, K> {
    /// Lays the view over the bytes. Panics if the page is not internal.
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(
            page_type_of(data),
            PageType::BTreeInternal,
            "{} is not an internal page",
            page_id_of(data)
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn entry_size() -> usize {
        K::ENCODED_SIZE + CHILD_SIZE
    }

    #[inline]
    fn entry_offset(i: usize) -> usize {
        INTERNAL_HEADER_SIZE + i * Self::entry_size()
    }

    /// Number of children.
    pub fn size(&self) -> usize {
        size_of(self.data) as usize
    }

    /// Maximum number of children.
    pub fn max_size(&self) -> usize {
        max_size_of(self.data) as usize
    }

    /// Minimum child count for a non-root internal page.
    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    /// This page's id.
    pub fn page_id(&self) -> PageId {
        page_id_of(self.data)
    }

    /// Separator key of entry `i`. Entry 0's key is a ghost and may not be
    /// read.
    pub fn key_at(&self, i: usize) -> K {
        debug_assert!(i >= 1 && i < self.size(), "ghost or out-of-range key");
        self.key_at_raw(i)
    }

    /// Reads the key slot of entry `i` without the ghost check. Split
    /// promotion reads slot 0 of a fresh sibling through this.
    pub fn key_at_raw(&self, i: usize) -> K {
        K::decode(&self.data[Self::entry_offset(i)..])
    }

    /// Child pointer of entry `i`.
    pub fn child_at(&self, i: usize) -> PageId {
        debug_assert!(i < self.size());
        PageId(read_u32(self.data, Self::entry_offset(i) + K::ENCODED_SIZE))
    }

    /// The child whose subtree covers `key`: the last entry whose separator
    /// is `<=` the key, entry 0 when the key sorts before every separator.
    pub fn lookup_child(&self, key: &K) -> PageId {
        let size = self.size();
        let mut low = 1usize;
        let mut high = size;
        while low < high {
            let mid = low + (high - low) / 2;
            if *key < self.key_at(mid) {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        self.child_at(low - 1)
    }

    /// Index of the entry holding `child`, if present.
    pub fn find_child_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }
}

/// Write view over an internal page.
pub struct InternalMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalMut<'a, K> {
    /// Lays the view over the bytes. Panics if the page is not internal.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(
            page_type_of(data),
            PageType::BTreeInternal,
            "{} is not an internal page",
            page_id_of(data)
        );
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Formats the bytes as an empty internal page and returns the view.
    pub fn init(data: &'a mut [u8], page_id: PageId, max_size: u32) -> Self {
        debug_assert!(max_size as usize <= internal_capacity::<K>());
        write_common_header(data, PageType::BTreeInternal, page_id, max_size);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read view over the same bytes.
    pub fn as_ref(&self) -> InternalRef<'_, K> {
        InternalRef {
            data: self.data,
            _marker: PhantomData,
        }
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.data, SIZE_OFFSET, size as u32);
    }

    fn write_entry(&mut self, i: usize, key: K, child: PageId) {
        let off = InternalRef::<K>::entry_offset(i);
        key.encode(&mut self.data[off..]);
        write_u32(self.data, off + K::ENCODED_SIZE, child.0);
    }

    fn set_child_at(&mut self, i: usize, child: PageId) {
        let off = InternalRef::<K>::entry_offset(i) + K::ENCODED_SIZE;
        write_u32(self.data, off, child.0);
    }

    /// Rewrites the separator key of entry `i` (never the ghost slot).
    pub fn set_key_at(&mut self, i: usize, key: K) {
        debug_assert!(i >= 1 && i < self.as_ref().size());
        let off = InternalRef::<K>::entry_offset(i);
        key.encode(&mut self.data[off..]);
    }

    /// Fills a fresh page as the root above a just-split old root.
    pub fn populate_new_root(&mut self, left: PageId, key: K, right: PageId) {
        debug_assert_eq!(self.as_ref().size(), 0);
        let ghost_off = InternalRef::<K>::entry_offset(0);
        self.data[ghost_off..ghost_off + K::ENCODED_SIZE].fill(0);
        self.set_size(2);
        self.set_child_at(0, left);
        self.write_entry(1, key, right);
    }

    /// Inserts a separator and its right child, keeping entries sorted.
    /// The caller checks fullness first.
    pub fn insert(&mut self, key: K, child: PageId) {
        let view = self.as_ref();
        let size = view.size();
        debug_assert!(size >= 1, "insert into an unrooted internal page");
        debug_assert!(size < view.max_size(), "insert into a full internal page");

        let mut low = 1usize;
        let mut high = size;
        while low < high {
            let mid = low + (high - low) / 2;
            if key < view.key_at(mid) {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        let es = InternalRef::<K>::entry_size();
        let start = InternalRef::<K>::entry_offset(low);
        let end = InternalRef::<K>::entry_offset(size);
        self.data.copy_within(start..end, start + es);
        self.write_entry(low, key, child);
        self.set_size(size + 1);
    }

    /// Splits a full internal page around pivot `size/2 + 1`, inserting the
    /// pending separator into whichever half its ordering dictates. Returns
    /// the promoted key; its copy in the new sibling's slot 0 becomes that
    /// page's ghost.
    pub fn insert_and_split(&mut self, key: K, child: PageId, new_page: &mut InternalMut<'_, K>) -> K {
        let size = self.as_ref().size();
        let pivot = size / 2 + 1;
        let es = InternalRef::<K>::entry_size();

        if key > self.as_ref().key_at(pivot) {
            let start = InternalRef::<K>::entry_offset(pivot);
            let end = InternalRef::<K>::entry_offset(size);
            new_page.data[INTERNAL_HEADER_SIZE..INTERNAL_HEADER_SIZE + (end - start)]
                .copy_from_slice(&self.data[start..end]);
            new_page.set_size(size - pivot);
            self.set_size(pivot);
            new_page.insert(key, child);
        } else {
            let start = InternalRef::<K>::entry_offset(pivot - 1);
            let end = InternalRef::<K>::entry_offset(size);
            new_page.data[INTERNAL_HEADER_SIZE..INTERNAL_HEADER_SIZE + (end - start)]
                .copy_from_slice(&self.data[start..end]);
            new_page.set_size(size - pivot + 1);
            self.set_size(pivot - 1);
            self.insert(key, child);
        }
        new_page.as_ref().key_at_raw(0)
    }

    /// Removes entry `idx`, left-shifting the entries after it.
    pub fn delete_at(&mut self, idx: usize) {
        let size = self.as_ref().size();
        debug_assert!(idx < size);
        let es = InternalRef::<K>::entry_size();
        let start = InternalRef::<K>::entry_offset(idx + 1);
        let end = InternalRef::<K>::entry_offset(size);
        self.data.copy_within(start..end, start - es);
        self.set_size(size - 1);
    }

    /// Appends an entry. Used when a sibling donates its first child: the
    /// parent's old separator comes down as the new entry's key.
    pub fn push_back(&mut self, key: K, child: PageId) {
        let size = self.as_ref().size();
        debug_assert!(size < self.as_ref().max_size());
        self.write_entry(size, key, child);
        self.set_size(size + 1);
    }

    /// Removes and returns the last entry.
    pub fn pop_back(&mut self) -> (K, PageId) {
        let view = self.as_ref();
        let size = view.size();
        debug_assert!(size >= 2);
        let entry = (view.key_at(size - 1), view.child_at(size - 1));
        self.set_size(size - 1);
        entry
    }

    /// Drops entry 0 and left-shifts the rest; the old entry 1's key slot
    /// becomes the new ghost. Returns the removed child.
    pub fn pop_front(&mut self) -> PageId {
        let view = self.as_ref();
        let size = view.size();
        debug_assert!(size >= 2);
        let child = view.child_at(0);
        let es = InternalRef::<K>::entry_size();
        let start = InternalRef::<K>::entry_offset(1);
        let end = InternalRef::<K>::entry_offset(size);
        self.data.copy_within(start..end, start - es);
        self.set_size(size - 1);
        child
    }

    /// Prepends an entry donated by the left sibling: `child` becomes the
    /// new entry 0 and the parent's old separator `sep` keys the shifted-up
    /// old entry 0.
    pub fn rotate_from_left(&mut self, sep: K, child: PageId) {
        let size = self.as_ref().size();
        debug_assert!(size < self.as_ref().max_size());
        let es = InternalRef::<K>::entry_size();
        let start = InternalRef::<K>::entry_offset(0);
        let end = InternalRef::<K>::entry_offset(size);
        self.data.copy_within(start..end, start + es);
        self.set_size(size + 1);
        let ghost_off = InternalRef::<K>::entry_offset(0);
        self.data[ghost_off..ghost_off + K::ENCODED_SIZE].fill(0);
        self.set_child_at(0, child);
        self.set_key_at(1, sep);
    }

    /// Merges the right sibling `src` into this page: the parent's old
    /// separator `sep` comes down to key `src`'s first child, then the rest
    /// of `src`'s entries follow.
    pub fn extend_from_internal(&mut self, sep: K, src: &InternalRef<'_, K>) {
        let size = self.as_ref().size();
        let extra = src.size();
        debug_assert!(size + extra <= self.as_ref().max_size());
        self.write_entry(size, sep, src.child_at(0));
        if extra > 1 {
            let dst_start = InternalRef::<K>::entry_offset(size + 1);
            let src_start = InternalRef::<K>::entry_offset(1);
            let src_end = InternalRef::<K>::entry_offset(extra);
            self.data[dst_start..dst_start + (src_end - src_start)]
                .copy_from_slice(&src.data[src_start..src_end]);
        }
        self.set_size(size + extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::key::Rid;

    fn blank() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    fn rid(n: u32) -> Rid {
        Rid::new(PageId(n), n)
    }

    #[test]
    fn test_capacities() {
        assert!(leaf_capacity::<i64, Rid>() >= 250);
        assert!(internal_capacity::<i64>() >= 330);
    }

    #[test]
    fn test_leaf_init() {
        let mut page = blank();
        let leaf = LeafMut::<i64, Rid>::init(&mut page, PageId(5), 4);
        let view = leaf.as_ref();

        assert_eq!(view.size(), 0);
        assert_eq!(view.max_size(), 4);
        assert_eq!(view.min_size(), 2);
        assert_eq!(view.page_id(), PageId(5));
        assert_eq!(view.next_page_id(), PageId::INVALID);
        assert_eq!(page_type_of(&page), PageType::BTreeLeaf);
    }

    #[test]
    fn test_leaf_insert_sorted() {
        let mut page = blank();
        let mut leaf = LeafMut::<i64, Rid>::init(&mut page, PageId(1), 8);

        for key in [5i64, 1, 9, 3] {
            leaf.insert(key, rid(key as u32));
        }

        let view = leaf.as_ref();
        assert_eq!(view.size(), 4);
        let keys: Vec<i64> = (0..view.size()).map(|i| view.key_at(i)).collect();
        assert_eq!(keys, vec![1, 3, 5, 9]);
        assert_eq!(view.lookup(&5), Some(rid(5)));
        assert_eq!(view.lookup(&4), None);
    }

    #[test]
    fn test_leaf_delete() {
        let mut page = blank();
        let mut leaf = LeafMut::<i64, Rid>::init(&mut page, PageId(1), 8);

        for key in 1i64..=4 {
            leaf.insert(key, rid(key as u32));
        }
        assert!(leaf.delete(&2));
        assert!(!leaf.delete(&2));

        let view = leaf.as_ref();
        assert_eq!(view.size(), 3);
        let keys: Vec<i64> = (0..view.size()).map(|i| view.key_at(i)).collect();
        assert_eq!(keys, vec![1, 3, 4]);
        assert_eq!(view.lookup(&3), Some(rid(3)));
    }

    #[test]
    fn test_leaf_split_upper_half_moves() {
        let mut old_page = blank();
        let mut new_page = blank();
        let mut leaf = LeafMut::<i64, Rid>::init(&mut old_page, PageId(1), 4);
        for key in [10i64, 20, 30, 40] {
            leaf.insert(key, rid(key as u32));
        }

        let mut new_leaf = LeafMut::<i64, Rid>::init(&mut new_page, PageId(2), 4);
        let sep = leaf.insert_and_split(35, rid(35), &mut new_leaf);

        // 35 sorts into the upper half, so the pivot leaves three records
        // behind and both halves satisfy the minimum.
        assert_eq!(sep, 35);
        let old = leaf.as_ref();
        let new = new_leaf.as_ref();
        assert_eq!(
            (0..old.size()).map(|i| old.key_at(i)).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        assert_eq!(
            (0..new.size()).map(|i| new.key_at(i)).collect::<Vec<_>>(),
            vec![35, 40]
        );
        assert_eq!(old.next_page_id(), PageId(2));
        assert_eq!(new.next_page_id(), PageId::INVALID);
    }

    #[test]
    fn test_leaf_split_key_in_lower_half() {
        let mut old_page = blank();
        let mut new_page = blank();
        let mut leaf = LeafMut::<i64, Rid>::init(&mut old_page, PageId(1), 4);
        for key in [10i64, 20, 30, 40] {
            leaf.insert(key, rid(key as u32));
        }
        // The old leaf already pointed somewhere; the chain must be preserved.
        leaf.set_next_page_id(PageId(9));

        let mut new_leaf = LeafMut::<i64, Rid>::init(&mut new_page, PageId(2), 4);
        let sep = leaf.insert_and_split(15, rid(15), &mut new_leaf);

        assert_eq!(sep, 30);
        let old = leaf.as_ref();
        let new = new_leaf.as_ref();
        assert_eq!(
            (0..old.size()).map(|i| old.key_at(i)).collect::<Vec<_>>(),
            vec![10, 15, 20]
        );
        assert_eq!(
            (0..new.size()).map(|i| new.key_at(i)).collect::<Vec<_>>(),
            vec![30, 40]
        );
        assert_eq!(old.next_page_id(), PageId(2));
        assert_eq!(new.next_page_id(), PageId(9));
    }

    #[test]
    fn test_leaf_pop_and_extend() {
        let mut left_page = blank();
        let mut right_page = blank();
        let mut left = LeafMut::<i64, Rid>::init(&mut left_page, PageId(1), 8);
        let mut right = LeafMut::<i64, Rid>::init(&mut right_page, PageId(2), 8);

        for key in [1i64, 2, 3] {
            left.insert(key, rid(key as u32));
        }
        for key in [7i64, 8] {
            right.insert(key, rid(key as u32));
        }

        assert_eq!(left.pop_back(), (3, rid(3)));
        assert_eq!(right.pop_front(), (7, rid(7)));

        left.extend_from(&right.as_ref());
        let view = left.as_ref();
        assert_eq!(
            (0..view.size()).map(|i| view.key_at(i)).collect::<Vec<_>>(),
            vec![1, 2, 8]
        );
    }

    #[test]
    #[should_panic(expected = "not a leaf page")]
    fn test_leaf_view_over_internal_panics() {
        let mut page = blank();
        InternalMut::<i64>::init(&mut page, PageId(1), 4);
        LeafRef::<i64, Rid>::new(&page);
    }

    #[test]
    fn test_internal_root_and_lookup() {
        let mut page = blank();
        let mut node = InternalMut::<i64>::init(&mut page, PageId(3), 4);
        node.populate_new_root(PageId(10), 50, PageId(11));

        let view = node.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.child_at(0), PageId(10));
        assert_eq!(view.child_at(1), PageId(11));
        assert_eq!(view.key_at(1), 50);

        assert_eq!(view.lookup_child(&0), PageId(10));
        assert_eq!(view.lookup_child(&49), PageId(10));
        assert_eq!(view.lookup_child(&50), PageId(11));
        assert_eq!(view.lookup_child(&99), PageId(11));
        assert_eq!(view.find_child_index(PageId(11)), Some(1));
        assert_eq!(view.find_child_index(PageId(99)), None);
    }

    #[test]
    fn test_internal_insert_sorted() {
        let mut page = blank();
        let mut node = InternalMut::<i64>::init(&mut page, PageId(3), 8);
        node.populate_new_root(PageId(10), 50, PageId(11));
        node.insert(30, PageId(12));
        node.insert(70, PageId(13));

        let view = node.as_ref();
        assert_eq!(view.size(), 4);
        assert_eq!(view.key_at(1), 30);
        assert_eq!(view.key_at(2), 50);
        assert_eq!(view.key_at(3), 70);
        assert_eq!(view.child_at(1), PageId(12));
        assert_eq!(view.child_at(2), PageId(11));
        assert_eq!(view.child_at(3), PageId(13));
        assert_eq!(view.lookup_child(&35), PageId(12));
        assert_eq!(view.lookup_child(&70), PageId(13));
    }

    #[test]
    fn test_internal_split_key_goes_right() {
        let mut old_page = blank();
        let mut new_page = blank();
        let mut node = InternalMut::<i64>::init(&mut old_page, PageId(3), 4);
        node.populate_new_root(PageId(10), 20, PageId(11));
        node.insert(40, PageId(12));
        node.insert(60, PageId(13));
        assert_eq!(node.as_ref().size(), 4);

        let mut sibling = InternalMut::<i64>::init(&mut new_page, PageId(4), 4);
        // 80 > key at pivot (60): the upper entries move, 80 joins them.
        let promoted = node.insert_and_split(80, PageId(14), &mut sibling);

        assert_eq!(promoted, 60);
        let old = node.as_ref();
        let new = sibling.as_ref();
        assert_eq!(old.size(), 3);
        assert_eq!(old.child_at(0), PageId(10));
        assert_eq!(old.key_at(1), 20);
        assert_eq!(old.key_at(2), 40);
        assert_eq!(new.size(), 2);
        assert_eq!(new.child_at(0), PageId(13));
        assert_eq!(new.key_at(1), 80);
        assert_eq!(new.child_at(1), PageId(14));
    }

    #[test]
    fn test_internal_split_key_goes_left() {
        let mut old_page = blank();
        let mut new_page = blank();
        let mut node = InternalMut::<i64>::init(&mut old_page, PageId(3), 4);
        node.populate_new_root(PageId(10), 20, PageId(11));
        node.insert(40, PageId(12));
        node.insert(60, PageId(13));

        let mut sibling = InternalMut::<i64>::init(&mut new_page, PageId(4), 4);
        // 30 <= key at pivot (60): entries from pivot-1 move, 30 stays left.
        let promoted = node.insert_and_split(30, PageId(14), &mut sibling);

        assert_eq!(promoted, 40);
        let old = node.as_ref();
        let new = sibling.as_ref();
        assert_eq!(old.size(), 3);
        assert_eq!(old.child_at(0), PageId(10));
        assert_eq!(old.key_at(1), 20);
        assert_eq!(old.key_at(2), 30);
        assert_eq!(old.child_at(2), PageId(14));
        assert_eq!(new.size(), 2);
        assert_eq!(new.child_at(0), PageId(12));
        assert_eq!(new.key_at(1), 60);
        assert_eq!(new.child_at(1), PageId(13));
    }

    #[test]
    fn test_internal_delete_at() {
        let mut page = blank();
        let mut node = InternalMut::<i64>::init(&mut page, PageId(3), 8);
        node.populate_new_root(PageId(10), 20, PageId(11));
        node.insert(40, PageId(12));

        node.delete_at(1);
        let view = node.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.child_at(0), PageId(10));
        assert_eq!(view.key_at(1), 40);
        assert_eq!(view.child_at(1), PageId(12));
    }

    #[test]
    fn test_internal_rotations() {
        let mut page = blank();
        let mut node = InternalMut::<i64>::init(&mut page, PageId(3), 8);
        node.populate_new_root(PageId(10), 50, PageId(11));

        // Donation from the left: child 9 arrives in front, the parent's old
        // separator 30 keys what used to be entry 0.
        node.rotate_from_left(30, PageId(9));
        {
            let view = node.as_ref();
            assert_eq!(view.size(), 3);
            assert_eq!(view.child_at(0), PageId(9));
            assert_eq!(view.key_at(1), 30);
            assert_eq!(view.child_at(1), PageId(10));
            assert_eq!(view.key_at(2), 50);
        }

        // Donation from the right: the parent's old separator 70 keys the
        // arriving child.
        node.push_back(70, PageId(12));
        {
            let view = node.as_ref();
            assert_eq!(view.size(), 4);
            assert_eq!(view.key_at(3), 70);
            assert_eq!(view.child_at(3), PageId(12));
        }

        assert_eq!(node.pop_back(), (70, PageId(12)));
        assert_eq!(node.pop_front(), PageId(9));
        let view = node.as_ref();
        assert_eq!(view.size(), 2);
        assert_eq!(view.child_at(0), PageId(10));
        assert_eq!(view.key_at(1), 50);
    }

    #[test]
    fn test_internal_merge() {
        let mut left_page = blank();
        let mut right_page = blank();
        let mut left = InternalMut::<i64>::init(&mut left_page, PageId(3), 8);
        let mut right = InternalMut::<i64>::init(&mut right_page, PageId(4), 8);
        left.populate_new_root(PageId(10), 20, PageId(11));
        right.populate_new_root(PageId(12), 60, PageId(13));

        left.extend_from_internal(40, &right.as_ref());

        let view = left.as_ref();
        assert_eq!(view.size(), 4);
        assert_eq!(view.child_at(0), PageId(10));
        assert_eq!(view.key_at(1), 20);
        assert_eq!(view.key_at(2), 40);
        assert_eq!(view.child_at(2), PageId(12));
        assert_eq!(view.key_at(3), 60);
        assert_eq!(view.child_at(3), PageId(13));
    }
}
