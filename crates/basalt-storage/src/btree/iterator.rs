//! Forward iterator over B+Tree leaves.

use super::key::{IndexKey, IndexValue};
use super::page::LeafRef;
use basalt_buffer::BufferPoolManager;
use basalt_common::page::{PageId, PAGE_SIZE};
use parking_lot::RwLockReadGuard;
use std::marker::PhantomData;

struct LeafCursor<'a> {
    page_id: PageId,
    guard: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

/// Forward scan over the leaf chain in ascending key order.
///
/// Holds exactly one pin and one read latch, on the current leaf. Advancing
/// to the next leaf pins it, then tries its read latch; if the latch is
/// contended the current leaf is released before blocking, so a scan never
/// takes part in a latch cycle with a rebalancing writer. An I/O failure
/// while advancing ends the scan.
///
/// The scan is latch-coupled, not a snapshot: it observes modifications
/// that land between leaves.
pub struct TreeIterator<'a, K: IndexKey, V: IndexValue> {
    bpm: &'a BufferPoolManager,
    leaf: Option<LeafCursor<'a>>,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> TreeIterator<'a, K, V> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        page_id: PageId,
        guard: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
    ) -> Self {
        Self {
            bpm,
            leaf: Some(LeafCursor { page_id, guard }),
            index: 0,
            _marker: PhantomData,
        }
    }

    pub(crate) fn empty(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Positions the cursor at the first record whose key is `>= key`.
    pub(crate) fn seek(&mut self, key: &K) {
        loop {
            let Some(cursor) = &self.leaf else {
                return;
            };
            let view = LeafRef::<K, V>::new(&cursor.guard[..]);
            let idx = match view.find_index(key) {
                Ok(i) => i,
                Err(i) => i,
            };
            if idx < view.size() {
                self.index = idx;
                return;
            }
            self.advance_leaf();
        }
    }

    fn release(&mut self, cursor: LeafCursor<'a>) {
        let LeafCursor { page_id, guard } = cursor;
        drop(guard);
        self.bpm.unpin_page(page_id, false);
    }

    /// Moves to the next leaf in the chain, or to the end of the scan.
    fn advance_leaf(&mut self) {
        let Some(cursor) = self.leaf.take() else {
            return;
        };
        let next = LeafRef::<K, V>::new(&cursor.guard[..]).next_page_id();
        if !next.is_valid() {
            self.release(cursor);
            return;
        }

        let next_frame = match self.bpm.fetch_page(next) {
            Ok(frame) => frame,
            Err(_) => {
                self.release(cursor);
                return;
            }
        };
        match next_frame.try_read_data() {
            Some(next_guard) => {
                self.release(cursor);
                self.leaf = Some(LeafCursor {
                    page_id: next,
                    guard: next_guard,
                });
            }
            None => {
                // Contended: let go of the current leaf before blocking.
                self.release(cursor);
                let next_guard = next_frame.read_data();
                self.leaf = Some(LeafCursor {
                    page_id: next,
                    guard: next_guard,
                });
            }
        }
        self.index = 0;
    }
}

impl<'a, K: IndexKey, V: IndexValue> Iterator for TreeIterator<'a, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let cursor = self.leaf.as_ref()?;
            let view = LeafRef::<K, V>::new(&cursor.guard[..]);
            if self.index < view.size() {
                let item = (view.key_at(self.index), view.value_at(self.index));
                self.index += 1;
                return Some(item);
            }
            self.advance_leaf();
        }
    }
}

impl<'a, K: IndexKey, V: IndexValue> Drop for TreeIterator<'a, K, V> {
    fn drop(&mut self) {
        if let Some(cursor) = self.leaf.take() {
            self.release(cursor);
        }
    }
}
