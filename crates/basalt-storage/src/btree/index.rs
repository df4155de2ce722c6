//! The B+Tree index.

use super::context::{LatchContext, PageGuard};
use super::iterator::TreeIterator;
use super::key::{IndexKey, IndexValue, Rid};
use super::page::{
    self, internal_capacity, leaf_capacity, InternalMut, InternalRef, LeafMut, LeafRef,
};
use crate::header::{HeaderView, HeaderViewMut};
use basalt_buffer::BufferPoolManager;
use basalt_common::page::{PageId, PageType, HEADER_PAGE_ID};
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CrabMode {
    Insert,
    Delete,
}

/// A concurrent B+Tree mapping fixed-width keys to fixed-width values.
///
/// All public operations are thread-safe. A completed `insert` is visible
/// to every later `get_value`; scans are latch-coupled traversals, not
/// snapshots.
pub struct BPlusTree<K: IndexKey, V: IndexValue> {
    /// Name under which the root page id is recorded in the header page.
    name: String,
    bpm: Arc<BufferPoolManager>,
    /// Root latch and the root page id it guards. `PageId::INVALID` while
    /// the tree is empty. Acquired first among tree latches whenever the
    /// root may change.
    root: Mutex<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K: IndexKey, V: IndexValue> BPlusTree<K, V> {
    /// Creates an empty tree. No pages are allocated until the first insert.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > crate::header::MAX_NAME_LEN {
            return Err(BasaltError::InvalidConfig(format!(
                "index name '{name}' must be 1..={} bytes",
                crate::header::MAX_NAME_LEN
            )));
        }
        if leaf_max_size < 2 || leaf_max_size as usize > leaf_capacity::<K, V>() {
            return Err(BasaltError::InvalidConfig(format!(
                "leaf_max_size {leaf_max_size} outside 2..={}",
                leaf_capacity::<K, V>()
            )));
        }
        if internal_max_size < 3 || internal_max_size as usize > internal_capacity::<K>() {
            return Err(BasaltError::InvalidConfig(format!(
                "internal_max_size {internal_max_size} outside 3..={}",
                internal_capacity::<K>()
            )));
        }
        Ok(Self {
            name,
            bpm,
            root: Mutex::new(PageId::INVALID),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    /// Opens a tree, adopting the root recorded in the header page if this
    /// index was persisted before.
    pub fn open(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let tree = Self::new(name, bpm, leaf_max_size, internal_max_size)?;
        let recorded = {
            let frame = tree.bpm.fetch_page(HEADER_PAGE_ID)?;
            let root = {
                let data = frame.read_data();
                HeaderView::new(&data[..]).root_of(&tree.name)
            };
            tree.bpm.unpin_page(HEADER_PAGE_ID, false);
            root
        };
        if let Some(root_id) = recorded {
            *tree.root.lock() = root_id;
        }
        Ok(tree)
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the tree holds no root page.
    pub fn is_empty(&self) -> bool {
        !self.root.lock().is_valid()
    }

    /// The current root page id (`PageId::INVALID` for an empty tree).
    pub fn root_page_id(&self) -> PageId {
        *self.root.lock()
    }

    /// Records the root page id in the header page.
    fn persist_root(&self, root_id: PageId) -> Result<()> {
        let bpm = &*self.bpm;
        let frame = bpm.fetch_page(HEADER_PAGE_ID)?;
        let recorded = {
            let mut data = frame.write_data();
            let mut header = HeaderViewMut::new(&mut data[..]);
            header.update_record(&self.name, root_id) || header.insert_record(&self.name, root_id)
        };
        bpm.unpin_page(HEADER_PAGE_ID, true);
        if recorded {
            Ok(())
        } else {
            Err(BasaltError::Internal(format!(
                "header page full, cannot record root of '{}'",
                self.name
            )))
        }
    }

    /// Descends to the leaf covering `key`, write-latching the path and
    /// trimming the scratchpad at every safe node. On return the leaf is
    /// the top of the scratchpad.
    fn find_leaf_write(
        &self,
        ctx: &mut LatchContext<'_>,
        key: &K,
        mode: CrabMode,
    ) -> Result<()> {
        let bpm = ctx.bpm();
        let mut page_id = ctx.root_id()?;
        let mut at_root = true;
        loop {
            let frame = match bpm.fetch_page(page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    ctx.release_all_clean();
                    return Err(e);
                }
            };
            let guard = frame.write_data();
            let kind = page::page_type_of(&guard[..]);
            let size = page::size_of(&guard[..]) as usize;
            let max_size = page::max_size_of(&guard[..]) as usize;
            let min_size = (max_size + 1) / 2;

            // A safe node cannot split (insert) or underflow (delete), so
            // everything above it is released. The root is exempt from the
            // minimum and never replaced by a delete.
            let safe = match mode {
                CrabMode::Insert => size < max_size,
                CrabMode::Delete => at_root || size > min_size,
            };
            if safe {
                ctx.release_all_clean();
            }
            ctx.push(page_id, guard);

            match kind {
                PageType::BTreeLeaf => return Ok(()),
                PageType::BTreeInternal => {
                    page_id = InternalRef::<K>::new(ctx.top()?).lookup_child(key);
                }
                _ => panic!("{page_id} is not a b+tree page"),
            }
            at_root = false;
        }
    }

    /// Point lookup. Descends with hand-over-hand read latches: the child's
    /// latch is taken before the parent's is released.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        let bpm = &*self.bpm;
        let root_guard = self.root.lock();
        let root_id = *root_guard;
        if !root_id.is_valid() {
            return Ok(None);
        }
        let frame = bpm.fetch_page(root_id)?;
        let mut guard = frame.read_data();
        drop(root_guard);

        let mut page_id = root_id;
        loop {
            match page::page_type_of(&guard[..]) {
                PageType::BTreeLeaf => {
                    let found = LeafRef::<K, V>::new(&guard[..]).lookup(key);
                    drop(guard);
                    bpm.unpin_page(page_id, false);
                    return Ok(found);
                }
                PageType::BTreeInternal => {
                    let child = InternalRef::<K>::new(&guard[..]).lookup_child(key);
                    let child_frame = match bpm.fetch_page(child) {
                        Ok(frame) => frame,
                        Err(e) => {
                            drop(guard);
                            bpm.unpin_page(page_id, false);
                            return Err(e);
                        }
                    };
                    let child_guard = child_frame.read_data();
                    drop(guard);
                    bpm.unpin_page(page_id, false);
                    guard = child_guard;
                    page_id = child;
                }
                _ => panic!("{page_id} is not a b+tree page"),
            }
        }
    }

    /// Inserts a key/value pair. Returns false (and changes nothing) if the
    /// key is already present.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let bpm = &*self.bpm;
        let mut root_guard = self.root.lock();

        if !root_guard.is_valid() {
            // Start a new tree: a single leaf root.
            let (page_id, frame) = bpm.new_page()?;
            {
                let mut data = frame.write_data();
                let mut leaf = LeafMut::<K, V>::init(&mut data[..], page_id, self.leaf_max_size);
                leaf.insert(key, value);
            }
            *root_guard = page_id;
            let persisted = self.persist_root(page_id);
            bpm.unpin_page(page_id, true);
            persisted?;
            return Ok(true);
        }

        let mut ctx = LatchContext::new(bpm, root_guard);
        self.find_leaf_write(&mut ctx, &key, CrabMode::Insert)?;

        {
            let leaf = LeafRef::<K, V>::new(ctx.top()?);
            if leaf.lookup(&key).is_some() {
                ctx.release_all_clean();
                return Ok(false);
            }
        }

        let leaf_full = LeafRef::<K, V>::new(ctx.top()?).size() >= self.leaf_max_size as usize;
        if !leaf_full {
            {
                let mut leaf = LeafMut::<K, V>::new(ctx.top_mut()?);
                leaf.insert(key, value);
            }
            let (page_id, guard) = ctx
                .pop()
                .ok_or_else(|| BasaltError::Internal("leaf not latched".to_string()))?;
            drop(guard);
            bpm.unpin_page(page_id, true);
            ctx.release_all_clean();
            return Ok(true);
        }

        self.insert_upforward(ctx, key, value)
    }

    /// Splits the latched full leaf and walks the scratchpad bottom-up,
    /// pushing separators into ancestors and splitting the full ones, until
    /// one absorbs the separator or a new root is installed.
    fn insert_upforward(&self, mut ctx: LatchContext<'_>, key: K, value: V) -> Result<bool> {
        let bpm = ctx.bpm();

        let (new_leaf_id, new_frame) = match bpm.new_page() {
            Ok(page) => page,
            Err(e) => {
                ctx.release_all_clean();
                return Err(e);
            }
        };
        let Some((leaf_pid, mut leaf_guard)) = ctx.pop() else {
            bpm.unpin_page(new_leaf_id, false);
            ctx.release_all_clean();
            return Err(BasaltError::Internal("leaf not latched".to_string()));
        };
        let separator = {
            let mut new_data = new_frame.write_data();
            let mut new_leaf =
                LeafMut::<K, V>::init(&mut new_data[..], new_leaf_id, self.leaf_max_size);
            let mut leaf = LeafMut::<K, V>::new(&mut leaf_guard[..]);
            leaf.insert_and_split(key, value, &mut new_leaf)
        };
        drop(leaf_guard);
        bpm.unpin_page(leaf_pid, true);
        bpm.unpin_page(new_leaf_id, true);

        let mut carry_key = separator;
        let mut carry_child = new_leaf_id;
        while let Some((page_id, mut guard)) = ctx.pop() {
            let full = InternalRef::<K>::new(&guard[..]).size() >= self.internal_max_size as usize;
            if !full {
                {
                    let mut node = InternalMut::<K>::new(&mut guard[..]);
                    node.insert(carry_key, carry_child);
                }
                drop(guard);
                bpm.unpin_page(page_id, true);
                ctx.release_all_clean();
                return Ok(true);
            }

            let (sibling_id, sibling_frame) = match bpm.new_page() {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    bpm.unpin_page(page_id, false);
                    ctx.release_all_clean();
                    return Err(e);
                }
            };
            let promoted = {
                let mut sibling_data = sibling_frame.write_data();
                let mut sibling = InternalMut::<K>::init(
                    &mut sibling_data[..],
                    sibling_id,
                    self.internal_max_size,
                );
                let mut node = InternalMut::<K>::new(&mut guard[..]);
                node.insert_and_split(carry_key, carry_child, &mut sibling)
            };
            drop(guard);
            bpm.unpin_page(page_id, true);
            bpm.unpin_page(sibling_id, true);
            carry_key = promoted;
            carry_child = sibling_id;
        }

        // The propagation climbed past the root: install a new root above
        // the old one while the root latch is still held.
        let mut root_guard = ctx.take_root().ok_or_else(|| {
            BasaltError::Internal("root latch not held for a root replacement".to_string())
        })?;
        let (new_root_id, root_frame) = bpm.new_page()?;
        {
            let mut data = root_frame.write_data();
            let mut root =
                InternalMut::<K>::init(&mut data[..], new_root_id, self.internal_max_size);
            root.populate_new_root(*root_guard, carry_key, carry_child);
        }
        *root_guard = new_root_id;
        let persisted = self.persist_root(new_root_id);
        bpm.unpin_page(new_root_id, true);
        drop(root_guard);
        persisted?;
        Ok(true)
    }

    /// Removes a key. Returns false if it is absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let bpm = &*self.bpm;
        let root_guard = self.root.lock();
        if !root_guard.is_valid() {
            return Ok(false);
        }

        let mut ctx = LatchContext::new(bpm, root_guard);
        self.find_leaf_write(&mut ctx, key, CrabMode::Delete)?;

        let leaf_is_root = ctx.page_count() == 1;
        let removed;
        let underfull;
        {
            let mut leaf = LeafMut::<K, V>::new(ctx.top_mut()?);
            removed = leaf.delete(key);
            let view = leaf.as_ref();
            underfull = view.size() < view.min_size();
        }

        if !removed {
            ctx.release_all_clean();
            return Ok(false);
        }
        if leaf_is_root || !underfull {
            let (page_id, guard) = ctx
                .pop()
                .ok_or_else(|| BasaltError::Internal("leaf not latched".to_string()))?;
            drop(guard);
            bpm.unpin_page(page_id, true);
            ctx.release_all_clean();
            return Ok(true);
        }

        self.rebalance_upward(ctx)?;
        Ok(true)
    }

    /// Fixes an underfull node by borrowing from a sibling or merging into
    /// one, walking up the scratchpad while ancestors underflow in turn.
    /// The underfull node sits on top of the scratchpad with its parent
    /// right below, both write-latched.
    fn rebalance_upward(&self, mut ctx: LatchContext<'_>) -> Result<()> {
        let bpm = ctx.bpm();
        let (mut node_pid, mut node_guard) = ctx
            .pop()
            .ok_or_else(|| BasaltError::Internal("underfull node not latched".to_string()))?;

        loop {
            let Some((parent_pid, mut parent_guard)) = ctx.pop() else {
                // The node is the root; it may shrink below the minimum.
                drop(node_guard);
                bpm.unpin_page(node_pid, true);
                return Ok(());
            };

            let node_is_leaf = page::page_type_of(&node_guard[..]) == PageType::BTreeLeaf;
            let min_size = (page::max_size_of(&node_guard[..]) as usize + 1) / 2;
            let Some(idx) = InternalRef::<K>::new(&parent_guard[..]).find_child_index(node_pid)
            else {
                drop(node_guard);
                bpm.unpin_page(node_pid, true);
                drop(parent_guard);
                bpm.unpin_page(parent_pid, false);
                return Err(BasaltError::PageCorrupted {
                    page_id: parent_pid,
                    reason: format!("child {node_pid} missing from its parent"),
                });
            };
            let parent_size = InternalRef::<K>::new(&parent_guard[..]).size();

            // Left sibling: preferred donor and preferred merge partner.
            let mut left: Option<(PageId, PageGuard<'_>)> = None;
            if idx > 0 {
                let left_pid = InternalRef::<K>::new(&parent_guard[..]).child_at(idx - 1);
                let left_frame = match bpm.fetch_page(left_pid) {
                    Ok(frame) => frame,
                    Err(e) => {
                        drop(node_guard);
                        bpm.unpin_page(node_pid, true);
                        drop(parent_guard);
                        bpm.unpin_page(parent_pid, false);
                        return Err(e);
                    }
                };
                let mut left_guard = left_frame.write_data();
                if page::size_of(&left_guard[..]) as usize > min_size {
                    if node_is_leaf {
                        let (k, v) = LeafMut::<K, V>::new(&mut left_guard[..]).pop_back();
                        LeafMut::<K, V>::new(&mut node_guard[..]).insert(k, v);
                        InternalMut::<K>::new(&mut parent_guard[..]).set_key_at(idx, k);
                    } else {
                        let (left_key, left_child) =
                            InternalMut::<K>::new(&mut left_guard[..]).pop_back();
                        let sep = InternalRef::<K>::new(&parent_guard[..]).key_at(idx);
                        InternalMut::<K>::new(&mut node_guard[..]).rotate_from_left(sep, left_child);
                        InternalMut::<K>::new(&mut parent_guard[..]).set_key_at(idx, left_key);
                    }
                    drop(left_guard);
                    bpm.unpin_page(left_pid, true);
                    drop(node_guard);
                    bpm.unpin_page(node_pid, true);
                    drop(parent_guard);
                    bpm.unpin_page(parent_pid, true);
                    ctx.release_all_clean();
                    return Ok(());
                }
                left = Some((left_pid, left_guard));
            }

            // Right sibling as the fallback donor.
            let mut right: Option<(PageId, PageGuard<'_>)> = None;
            if idx + 1 < parent_size {
                let right_pid = InternalRef::<K>::new(&parent_guard[..]).child_at(idx + 1);
                let right_frame = match bpm.fetch_page(right_pid) {
                    Ok(frame) => frame,
                    Err(e) => {
                        if let Some((left_pid, left_guard)) = left {
                            drop(left_guard);
                            bpm.unpin_page(left_pid, false);
                        }
                        drop(node_guard);
                        bpm.unpin_page(node_pid, true);
                        drop(parent_guard);
                        bpm.unpin_page(parent_pid, false);
                        return Err(e);
                    }
                };
                let mut right_guard = right_frame.write_data();
                if page::size_of(&right_guard[..]) as usize > min_size {
                    if node_is_leaf {
                        let (k, v) = LeafMut::<K, V>::new(&mut right_guard[..]).pop_front();
                        LeafMut::<K, V>::new(&mut node_guard[..]).insert(k, v);
                        let new_sep = LeafRef::<K, V>::new(&right_guard[..]).key_at(0);
                        InternalMut::<K>::new(&mut parent_guard[..]).set_key_at(idx + 1, new_sep);
                    } else {
                        let sep = InternalRef::<K>::new(&parent_guard[..]).key_at(idx + 1);
                        let new_sep = InternalRef::<K>::new(&right_guard[..]).key_at(1);
                        let right_child = InternalMut::<K>::new(&mut right_guard[..]).pop_front();
                        InternalMut::<K>::new(&mut node_guard[..]).push_back(sep, right_child);
                        InternalMut::<K>::new(&mut parent_guard[..]).set_key_at(idx + 1, new_sep);
                    }
                    if let Some((left_pid, left_guard)) = left {
                        drop(left_guard);
                        bpm.unpin_page(left_pid, false);
                    }
                    drop(right_guard);
                    bpm.unpin_page(right_pid, true);
                    drop(node_guard);
                    bpm.unpin_page(node_pid, true);
                    drop(parent_guard);
                    bpm.unpin_page(parent_pid, true);
                    ctx.release_all_clean();
                    return Ok(());
                }
                right = Some((right_pid, right_guard));
            }

            // No donor: merge. The right half of a merge is the page that
            // disappears.
            if let Some((left_pid, mut left_guard)) = left {
                if let Some((right_pid, right_guard)) = right {
                    drop(right_guard);
                    bpm.unpin_page(right_pid, false);
                }
                if node_is_leaf {
                    let next = LeafRef::<K, V>::new(&node_guard[..]).next_page_id();
                    let mut left_leaf = LeafMut::<K, V>::new(&mut left_guard[..]);
                    left_leaf.extend_from(&LeafRef::<K, V>::new(&node_guard[..]));
                    left_leaf.set_next_page_id(next);
                } else {
                    let sep = InternalRef::<K>::new(&parent_guard[..]).key_at(idx);
                    InternalMut::<K>::new(&mut left_guard[..])
                        .extend_from_internal(sep, &InternalRef::<K>::new(&node_guard[..]));
                }
                InternalMut::<K>::new(&mut parent_guard[..]).delete_at(idx);
                drop(left_guard);
                bpm.unpin_page(left_pid, true);
                drop(node_guard);
                bpm.unpin_page(node_pid, false);
                if let Err(e) = bpm.delete_page(node_pid) {
                    drop(parent_guard);
                    bpm.unpin_page(parent_pid, true);
                    return Err(e);
                }
            } else if let Some((right_pid, mut right_guard)) = right {
                if node_is_leaf {
                    let next = LeafRef::<K, V>::new(&right_guard[..]).next_page_id();
                    let mut node_leaf = LeafMut::<K, V>::new(&mut node_guard[..]);
                    node_leaf.extend_from(&LeafRef::<K, V>::new(&right_guard[..]));
                    node_leaf.set_next_page_id(next);
                } else {
                    let sep = InternalRef::<K>::new(&parent_guard[..]).key_at(idx + 1);
                    InternalMut::<K>::new(&mut node_guard[..])
                        .extend_from_internal(sep, &InternalRef::<K>::new(&right_guard[..]));
                }
                InternalMut::<K>::new(&mut parent_guard[..]).delete_at(idx + 1);
                drop(right_guard);
                bpm.unpin_page(right_pid, false);
                if let Err(e) = bpm.delete_page(right_pid) {
                    drop(node_guard);
                    bpm.unpin_page(node_pid, true);
                    drop(parent_guard);
                    bpm.unpin_page(parent_pid, true);
                    return Err(e);
                }
                drop(node_guard);
                bpm.unpin_page(node_pid, true);
            } else {
                // The parent is a single-child root; there is no sibling to
                // rebalance against.
                drop(node_guard);
                bpm.unpin_page(node_pid, true);
                drop(parent_guard);
                bpm.unpin_page(parent_pid, false);
                ctx.release_all_clean();
                return Ok(());
            }

            let parent_min = (page::max_size_of(&parent_guard[..]) as usize + 1) / 2;
            let parent_is_root = ctx.page_count() == 0;
            if parent_is_root || InternalRef::<K>::new(&parent_guard[..]).size() >= parent_min {
                drop(parent_guard);
                bpm.unpin_page(parent_pid, true);
                ctx.release_all_clean();
                return Ok(());
            }
            node_pid = parent_pid;
            node_guard = parent_guard;
        }
    }

    /// Scan from the smallest key.
    pub fn iter(&self) -> Result<TreeIterator<'_, K, V>> {
        let bpm = &*self.bpm;
        let root_guard = self.root.lock();
        let root_id = *root_guard;
        if !root_id.is_valid() {
            return Ok(TreeIterator::empty(bpm));
        }
        let frame = bpm.fetch_page(root_id)?;
        let mut guard = frame.read_data();
        drop(root_guard);

        let mut page_id = root_id;
        loop {
            match page::page_type_of(&guard[..]) {
                PageType::BTreeLeaf => return Ok(TreeIterator::new(bpm, page_id, guard)),
                PageType::BTreeInternal => {
                    let child = InternalRef::<K>::new(&guard[..]).child_at(0);
                    let child_frame = match bpm.fetch_page(child) {
                        Ok(frame) => frame,
                        Err(e) => {
                            drop(guard);
                            bpm.unpin_page(page_id, false);
                            return Err(e);
                        }
                    };
                    let child_guard = child_frame.read_data();
                    drop(guard);
                    bpm.unpin_page(page_id, false);
                    guard = child_guard;
                    page_id = child;
                }
                _ => panic!("{page_id} is not a b+tree page"),
            }
        }
    }

    /// Scan from the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K, V>> {
        let bpm = &*self.bpm;
        let root_guard = self.root.lock();
        let root_id = *root_guard;
        if !root_id.is_valid() {
            return Ok(TreeIterator::empty(bpm));
        }
        let frame = bpm.fetch_page(root_id)?;
        let mut guard = frame.read_data();
        drop(root_guard);

        let mut page_id = root_id;
        loop {
            match page::page_type_of(&guard[..]) {
                PageType::BTreeLeaf => {
                    let mut it = TreeIterator::new(bpm, page_id, guard);
                    it.seek(key);
                    return Ok(it);
                }
                PageType::BTreeInternal => {
                    let child = InternalRef::<K>::new(&guard[..]).lookup_child(key);
                    let child_frame = match bpm.fetch_page(child) {
                        Ok(frame) => frame,
                        Err(e) => {
                            drop(guard);
                            bpm.unpin_page(page_id, false);
                            return Err(e);
                        }
                    };
                    let child_guard = child_frame.read_data();
                    drop(guard);
                    bpm.unpin_page(page_id, false);
                    guard = child_guard;
                    page_id = child;
                }
                _ => panic!("{page_id} is not a b+tree page"),
            }
        }
    }

    /// Number of levels from the root down to the leaves. Zero for an empty
    /// tree. Intended for tests and debugging on a quiescent tree.
    pub fn height(&self) -> Result<u32> {
        let root_id = *self.root.lock();
        if !root_id.is_valid() {
            return Ok(0);
        }
        let bpm = &*self.bpm;
        let mut page_id = root_id;
        let mut height = 1;
        loop {
            let frame = bpm.fetch_page(page_id)?;
            let (kind, first_child) = {
                let data = frame.read_data();
                let kind = page::page_type_of(&data[..]);
                let child = if kind == PageType::BTreeInternal {
                    InternalRef::<K>::new(&data[..]).child_at(0)
                } else {
                    PageId::INVALID
                };
                (kind, child)
            };
            bpm.unpin_page(page_id, false);
            match kind {
                PageType::BTreeLeaf => return Ok(height),
                PageType::BTreeInternal => {
                    page_id = first_child;
                    height += 1;
                }
                _ => panic!("{page_id} is not a b+tree page"),
            }
        }
    }

    /// Checks the structural invariants of a quiescent tree: in-node key
    /// order, separator bounds, min/max size for non-root nodes, uniform
    /// leaf depth, and leaf-chain consistency with the in-order walk.
    pub fn verify_integrity(&self) -> Result<()> {
        let root_id = *self.root.lock();
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut leaf_depths = Vec::new();
        let mut entries = 0usize;
        self.check_node(root_id, None, None, true, 1, &mut leaf_depths, &mut entries)?;

        if leaf_depths.windows(2).any(|w| w[0] != w[1]) {
            return Err(BasaltError::Internal(format!(
                "leaves at unequal depths: {leaf_depths:?}"
            )));
        }

        let mut scanned = 0usize;
        let mut previous: Option<K> = None;
        for (key, _) in self.iter()? {
            if let Some(prev) = previous {
                if prev >= key {
                    return Err(BasaltError::Internal(format!(
                        "leaf chain out of order: {prev:?} before {key:?}"
                    )));
                }
            }
            previous = Some(key);
            scanned += 1;
        }
        if scanned != entries {
            return Err(BasaltError::Internal(format!(
                "leaf chain visits {scanned} records, the tree holds {entries}"
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        page_id: PageId,
        lower: Option<K>,
        upper: Option<K>,
        is_root: bool,
        depth: u32,
        leaf_depths: &mut Vec<u32>,
        entries: &mut usize,
    ) -> Result<()> {
        let bpm = &*self.bpm;
        let frame = bpm.fetch_page(page_id)?;
        let data = frame.read_data();

        let bounds_ok = |key: &K| {
            lower.as_ref().map_or(true, |lo| lo <= key) && upper.as_ref().map_or(true, |hi| key < hi)
        };

        match page::page_type_of(&data[..]) {
            PageType::BTreeLeaf => {
                let leaf = LeafRef::<K, V>::new(&data[..]);
                let size = leaf.size();
                if size > leaf.max_size() || (!is_root && size < leaf.min_size()) {
                    drop(data);
                    bpm.unpin_page(page_id, false);
                    return Err(BasaltError::Internal(format!(
                        "leaf {page_id} has invalid size {size}"
                    )));
                }
                for i in 0..size {
                    let key = leaf.key_at(i);
                    if (i > 0 && leaf.key_at(i - 1) >= key) || !bounds_ok(&key) {
                        drop(data);
                        bpm.unpin_page(page_id, false);
                        return Err(BasaltError::Internal(format!(
                            "leaf {page_id} violates key order at record {i}"
                        )));
                    }
                }
                *entries += size;
                leaf_depths.push(depth);
                drop(data);
                bpm.unpin_page(page_id, false);
                Ok(())
            }
            PageType::BTreeInternal => {
                let node = InternalRef::<K>::new(&data[..]);
                let size = node.size();
                if size > node.max_size() || size < 1 || (!is_root && size < node.min_size()) {
                    drop(data);
                    bpm.unpin_page(page_id, false);
                    return Err(BasaltError::Internal(format!(
                        "internal {page_id} has invalid size {size}"
                    )));
                }
                let mut children = Vec::with_capacity(size);
                for i in 0..size {
                    if i >= 1 {
                        let key = node.key_at(i);
                        if (i > 1 && node.key_at(i - 1) >= key) || !bounds_ok(&key) {
                            drop(data);
                            bpm.unpin_page(page_id, false);
                            return Err(BasaltError::Internal(format!(
                                "internal {page_id} violates key order at entry {i}"
                            )));
                        }
                    }
                    let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                    let child_upper = if i + 1 < size {
                        Some(node.key_at(i + 1))
                    } else {
                        upper
                    };
                    children.push((node.child_at(i), child_lower, child_upper));
                }
                drop(data);
                bpm.unpin_page(page_id, false);

                for (child, child_lower, child_upper) in children {
                    self.check_node(
                        child,
                        child_lower,
                        child_upper,
                        false,
                        depth + 1,
                        leaf_depths,
                        entries,
                    )?;
                }
                Ok(())
            }
            _ => {
                drop(data);
                bpm.unpin_page(page_id, false);
                Err(BasaltError::Internal(format!(
                    "{page_id} is not a b+tree page"
                )))
            }
        }
    }

    /// Writes a Graphviz rendering of the tree. Debug aid for a quiescent
    /// tree.
    pub fn draw(&self, path: impl AsRef<Path>) -> Result<()> {
        let root_id = *self.root.lock();
        if !root_id.is_valid() {
            log::warn!("drawing an empty tree '{}'", self.name);
            return Ok(());
        }
        let mut out = String::new();
        out.push_str("digraph G {\n  node [shape=record];\n");
        self.node_to_dot(root_id, &mut out)?;
        out.push_str("}\n");
        std::fs::write(path, out)?;
        Ok(())
    }

    fn node_to_dot(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let bpm = &*self.bpm;
        let frame = bpm.fetch_page(page_id)?;
        let data = frame.read_data();

        match page::page_type_of(&data[..]) {
            PageType::BTreeLeaf => {
                let leaf = LeafRef::<K, V>::new(&data[..]);
                let keys: Vec<String> = (0..leaf.size())
                    .map(|i| format!("{:?}", leaf.key_at(i)))
                    .collect();
                let _ = writeln!(
                    out,
                    "  leaf_{} [label=\"P{} | {}\" color=green];",
                    page_id.0,
                    page_id.0,
                    keys.join(" | ")
                );
                let next = leaf.next_page_id();
                if next.is_valid() {
                    let _ = writeln!(out, "  leaf_{} -> leaf_{};", page_id.0, next.0);
                }
                drop(data);
                bpm.unpin_page(page_id, false);
                Ok(())
            }
            PageType::BTreeInternal => {
                let node = InternalRef::<K>::new(&data[..]);
                let mut cells = vec![String::from(" ")];
                for i in 1..node.size() {
                    cells.push(format!("{:?}", node.key_at(i)));
                }
                let _ = writeln!(
                    out,
                    "  int_{} [label=\"P{} | {}\" color=pink];",
                    page_id.0,
                    page_id.0,
                    cells.join(" | ")
                );
                let children: Vec<PageId> = (0..node.size()).map(|i| node.child_at(i)).collect();
                drop(data);
                bpm.unpin_page(page_id, false);

                for child in children {
                    self.node_to_dot(child, out)?;
                    let prefix = {
                        let child_frame = bpm.fetch_page(child)?;
                        let child_data = child_frame.read_data();
                        let kind = page::page_type_of(&child_data[..]);
                        drop(child_data);
                        bpm.unpin_page(child, false);
                        if kind == PageType::BTreeLeaf {
                            "leaf"
                        } else {
                            "int"
                        }
                    };
                    let _ = writeln!(out, "  int_{} -> {}_{};", page_id.0, prefix, child.0);
                }
                Ok(())
            }
            _ => {
                drop(data);
                bpm.unpin_page(page_id, false);
                Err(BasaltError::Internal(format!(
                    "{page_id} is not a b+tree page"
                )))
            }
        }
    }
}

impl BPlusTree<i64, Rid> {
    /// Test helper: reads whitespace-separated keys from a file and inserts
    /// each with a record id derived from the key.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            if let Ok(key) = token.parse::<i64>() {
                self.insert(key, Rid::from_key(key))?;
            }
        }
        Ok(())
    }

    /// Test helper: reads whitespace-separated keys from a file and removes
    /// each.
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            if let Ok(key) = token.parse::<i64>() {
                self.remove(&key)?;
            }
        }
        Ok(())
    }
}
