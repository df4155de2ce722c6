//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{Frame, FrameId};
use crate::hash_table::ExtendibleHashTable;
use crate::replacer::{LruKReplacer, Replacer};
use basalt_common::page::{PageId, PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::System;

/// Bucket size of the extendible-hash page table.
const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// K parameter of the LRU-K replacement policy.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

/// Buffer pool manager.
///
/// Owns a fixed array of frames and mediates between disk pages and
/// in-memory frames:
/// - Page ID to frame ID mapping (extendible hash table)
/// - Free frame list for unoccupied frames
/// - LRU-K replacement for eviction
/// - Pin counting for concurrent access
///
/// One pool-wide mutex (which also owns the free list) serializes page
/// table, free list, and replacer updates; per-frame page latches guard
/// page contents independently. Disk I/O for misses and dirty-victim
/// write-back happens under the pool mutex, which keeps a racing thread
/// from reinstalling the same page twice.
pub struct BufferPoolManager {
    /// Number of frames in the pool.
    pool_size: usize,
    /// Array of buffer frames.
    frames: Vec<Frame>,
    /// Page ID to frame ID mapping.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// Pool latch; owns the free frame list.
    latch: Mutex<VecDeque<FrameId>>,
    /// Backing storage.
    disk: Arc<dyn DiskManager>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskManager>) -> Self {
        let pool_size = config.pool_size;
        assert!(pool_size >= 1, "pool must hold at least one frame");

        let frames: Vec<_> = (0..pool_size)
            .map(|i| Frame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: VecDeque<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            latch: Mutex::new(free_list),
            disk,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on low-memory systems.
    pub fn auto_sized(replacer_k: usize, disk: Arc<dyn DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let pool_size = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                pool_size,
                replacer_k,
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.latch.lock().len()
    }

    /// Checks whether a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        let _latch = self.latch.lock();
        self.page_table.contains(&page_id)
    }

    /// Reserves a frame: free list first, then eviction. A dirty victim is
    /// written back before its mapping is removed. Called under the pool
    /// latch.
    fn acquire_frame(&self, free_list: &mut VecDeque<FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(BasaltError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                log::debug!("writing back dirty victim {} from {}", old_page_id, frame_id);
                let data = frame.read_data();
                if let Err(e) = self.disk.write_page(old_page_id, &data[..]) {
                    drop(data);
                    // The victim stays resident; restore its replacer state.
                    self.replacer.record_access(frame_id);
                    self.replacer.set_evictable(frame_id, true);
                    return Err(e);
                }
                drop(data);
                frame.set_dirty(false);
            }
            self.page_table.remove(&old_page_id);
        }

        frame.reset();
        Ok(frame_id)
    }

    /// Allocates a brand-new page and pins it.
    ///
    /// The returned frame holds a zeroed page with pin count 1. Fails only
    /// when no frame is free and nothing is evictable.
    pub fn new_page(&self) -> Result<(PageId, &Frame)> {
        let mut free_list = self.latch.lock();

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &self.frames[frame_id.0 as usize];

        let page_id = match self.disk.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                free_list.push_back(frame_id);
                return Err(e);
            }
        };

        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((page_id, frame))
    }

    /// Fetches a page, reading it from disk on a miss, and pins it.
    ///
    /// Fails iff no frame can be obtained or the read fails.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&Frame> {
        let mut free_list = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &self.frames[frame_id.0 as usize];

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut data[..]) {
                drop(data);
                free_list.push_back(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(frame)
    }

    /// Drops one pin on a page. `is_dirty` is sticky: passing true marks the
    /// frame dirty, passing false never clears it. When the pin count hits
    /// zero the frame becomes evictable.
    ///
    /// Returns false if the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a page's bytes to disk and clears its dirty flag. Succeeds
    /// even while the page is pinned; fails if it is not resident.
    ///
    /// The frame is pinned internally while the pool latch is dropped around
    /// the data read, so a flush can wait on the page latch without stalling
    /// the rest of the pool. Net pin count and residency are unchanged.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame = {
            let _latch = self.latch.lock();
            let frame_id = self
                .page_table
                .find(&page_id)
                .ok_or(BasaltError::PageNotResident { page_id })?;
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.set_evictable(frame_id, false);
            frame
        };

        let result = {
            let data = frame.read_data();
            let r = self.disk.write_page(page_id, &data[..]);
            if r.is_ok() {
                // Cleared while the read latch is held, so a later writer's
                // dirty mark cannot be lost.
                frame.set_dirty(false);
            }
            r
        };

        let _latch = self.latch.lock();
        if frame.unpin() == 0 {
            if let Some(frame_id) = self.page_table.find(&page_id) {
                self.replacer.set_evictable(frame_id, true);
            }
        }
        result
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let _latch = self.latch.lock();
            self.frames.iter().filter_map(|f| f.page_id()).collect()
        };

        for page_id in page_ids {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted in the meantime; eviction already wrote it back.
                Err(BasaltError::PageNotResident { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Deletes a page from the pool and returns its id to the allocator.
    ///
    /// Returns `Ok(false)` (refused, no effect) if the page is pinned.
    /// Idempotent on non-resident ids.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut free_list = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            self.disk.deallocate_page(page_id)?;
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_pinned() {
            return Ok(false);
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let _latch = self.latch.lock();

        let mut used_frames = 0;
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for frame in &self.frames {
            if frame.page_id().is_some() {
                used_frames += 1;
                if frame.is_pinned() {
                    pinned_frames += 1;
                }
                if frame.is_dirty() {
                    dirty_frames += 1;
                }
            }
        }

        BufferPoolStats {
            total_frames: self.pool_size,
            free_frames: self.pool_size - used_frames,
            used_frames,
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of frames without a page.
    pub free_frames: usize,
    /// Number of frames holding a page.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
