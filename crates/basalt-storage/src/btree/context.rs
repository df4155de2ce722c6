//! Per-operation latch scratchpad for the crabbing protocol.

use basalt_buffer::BufferPoolManager;
use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::{MutexGuard, RwLockWriteGuard};

/// A held write latch over a frame's bytes.
pub(crate) type PageGuard<'a> = RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>;

/// The latches a single write operation holds while descending.
///
/// The root latch guard is the bottom-of-stack sentinel: while it is held,
/// `root_page_id` cannot change under the operation. Above it sit the
/// write-latched pages on the path, oldest first. Whenever the node just
/// latched is *safe* for the operation, everything below it is released;
/// releases always drop the latch before the matching unpin.
pub(crate) struct LatchContext<'a> {
    bpm: &'a BufferPoolManager,
    root: Option<MutexGuard<'a, PageId>>,
    pages: Vec<(PageId, PageGuard<'a>)>,
}

impl<'a> LatchContext<'a> {
    pub fn new(bpm: &'a BufferPoolManager, root: MutexGuard<'a, PageId>) -> Self {
        Self {
            bpm,
            root: Some(root),
            pages: Vec::new(),
        }
    }

    /// The buffer pool, with the context's full lifetime.
    pub fn bpm(&self) -> &'a BufferPoolManager {
        self.bpm
    }

    /// Reads the root page id through the held root latch.
    pub fn root_id(&self) -> Result<PageId> {
        self.root
            .as_ref()
            .map(|guard| **guard)
            .ok_or_else(|| BasaltError::Internal("root latch already released".to_string()))
    }

    pub fn push(&mut self, page_id: PageId, guard: PageGuard<'a>) {
        self.pages.push((page_id, guard));
    }

    pub fn pop(&mut self) -> Option<(PageId, PageGuard<'a>)> {
        self.pages.pop()
    }

    /// Number of latched pages on the stack.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes of the most recently latched page.
    pub fn top(&self) -> Result<&[u8]> {
        self.pages
            .last()
            .map(|(_, guard)| &guard[..])
            .ok_or_else(|| BasaltError::Internal("latch stack is empty".to_string()))
    }

    /// Mutable bytes of the most recently latched page.
    pub fn top_mut(&mut self) -> Result<&mut [u8]> {
        self.pages
            .last_mut()
            .map(|(_, guard)| &mut guard[..])
            .ok_or_else(|| BasaltError::Internal("latch stack is empty".to_string()))
    }

    /// Takes the root latch for a root replacement.
    pub fn take_root(&mut self) -> Option<MutexGuard<'a, PageId>> {
        self.root.take()
    }

    /// Releases every held latch in scratchpad order (oldest first),
    /// unpinning the released pages unmodified.
    pub fn release_all_clean(&mut self) {
        self.root = None;
        for (page_id, guard) in self.pages.drain(..) {
            drop(guard);
            self.bpm.unpin_page(page_id, false);
        }
    }
}

impl Drop for LatchContext<'_> {
    fn drop(&mut self) {
        // Normal paths drain the stack explicitly; this backstop keeps a
        // panicking operation from leaking pins.
        self.release_all_clean();
    }
}
