//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable or pins it out of the victim set.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction.
    ///
    /// Returns None if no frame is evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame and all of its access history from the replacer.
    /// The caller must ensure the frame is not pinned.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU-K replacement policy.
///
/// Frames with fewer than K recorded accesses live in the *young* queue and
/// are evicted first, in order of their oldest access (classical LRU over
/// frames without enough history, which approximates an infinite backward
/// K-distance). Frames with K or more accesses live in the *mature* queue,
/// kept in access-stamp order so a front-to-back scan finds the frame whose
/// K-th most recent access is oldest.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    inner: Mutex<LruKState>,
}

struct LruKState {
    /// Monotonic access stamp source.
    counter: u64,
    /// Access count per frame, capped at K.
    access_counts: Vec<usize>,
    /// Evictable flag per frame.
    evictable: Vec<bool>,
    /// Number of evictable frames.
    curr_size: usize,
    /// Stamps of frames with fewer than K accesses, in FIFO order.
    young: VecDeque<(FrameId, u64)>,
    /// Stamps of frames with at least K accesses, in stamp order.
    /// Each frame keeps exactly its K most recent stamps.
    mature: VecDeque<(FrameId, u64)>,
}

impl LruKReplacer {
    /// Creates a replacer tracking `num_frames` frames with parameter `k`.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            num_frames,
            inner: Mutex::new(LruKState {
                counter: 0,
                access_counts: vec![0; num_frames],
                evictable: vec![false; num_frames],
                curr_size: 0,
                young: VecDeque::new(),
                mature: VecDeque::new(),
            }),
        }
    }

    /// Returns the number of tracked frames.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Returns the K parameter.
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame(&self, frame_id: FrameId) -> usize {
        let idx = frame_id.0 as usize;
        assert!(idx < self.num_frames, "{} out of range", frame_id);
        idx
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let idx = self.check_frame(frame_id);
        let mut s = self.inner.lock();
        let stamp = s.counter;
        s.counter += 1;
        s.access_counts[idx] += 1;
        let count = s.access_counts[idx];

        if count < self.k {
            s.young.push_back((frame_id, stamp));
        } else if count == self.k {
            // The frame matures: carry its young history over with the
            // original stamps, restore stamp order, then append this access.
            let mut moved = Vec::new();
            s.young.retain(|e| {
                if e.0 == frame_id {
                    moved.push(*e);
                    false
                } else {
                    true
                }
            });
            s.mature.extend(moved);
            s.mature.make_contiguous().sort_by_key(|e| e.1);
            s.mature.push_back((frame_id, stamp));
        } else {
            s.access_counts[idx] = self.k;
            s.mature.push_back((frame_id, stamp));
            // Keep exactly K stamps: drop the frame's oldest.
            if let Some(pos) = s.mature.iter().position(|e| e.0 == frame_id) {
                s.mature.remove(pos);
            }
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let idx = self.check_frame(frame_id);
        let mut s = self.inner.lock();
        if s.evictable[idx] != evictable {
            if evictable {
                s.curr_size += 1;
            } else {
                s.curr_size -= 1;
            }
            s.evictable[idx] = evictable;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut s = self.inner.lock();

        let victim = s
            .young
            .iter()
            .find(|e| s.evictable[e.0 .0 as usize])
            .map(|e| e.0)
            .or_else(|| {
                s.mature
                    .iter()
                    .find(|e| s.evictable[e.0 .0 as usize])
                    .map(|e| e.0)
            })?;

        let idx = victim.0 as usize;
        s.young.retain(|e| e.0 != victim);
        s.mature.retain(|e| e.0 != victim);
        s.access_counts[idx] = 0;
        if s.evictable[idx] {
            s.evictable[idx] = false;
            s.curr_size -= 1;
        }
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = self.check_frame(frame_id);
        let mut s = self.inner.lock();
        s.young.retain(|e| e.0 != frame_id);
        s.mature.retain(|e| e.0 != frame_id);
        s.access_counts[idx] = 0;
        if s.evictable[idx] {
            s.evictable[idx] = false;
            s.curr_size -= 1;
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
