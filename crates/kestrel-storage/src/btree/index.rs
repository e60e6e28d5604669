//! Disk-resident B+tree index over the page cache.
//!
//! Readers descend with latch coupling: the child's shared guard is acquired
//! before the parent's is released, so no thread holds more than two shared
//! latches. Writers latch pessimistically: the header and every internal
//! page on the descent path stay exclusively latched in the [`Context`]
//! until the target leaf is proven safe for the mutation, at which point all
//! ancestor guards are released at once.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use kestrel_common::page::{PageId, PageType};
use kestrel_common::{KestrelError, Result};

use crate::cache::{PageCache, PageWriteGuard};
use crate::rid::RecordId;

use super::compare::KeyComparator;
use super::constants::{KEY_SIZE, MAX_INTERNAL_SLOTS, MAX_LEAF_SLOTS};
use super::context::Context;
use super::iter::TreeIterator;
use super::page::{
    copy_key, page_type, HeaderView, HeaderViewMut, InternalView, InternalViewMut, LeafView,
    LeafViewMut,
};

/// Outcome of one rebalancing step after a deletion.
enum Rebalance {
    /// The node borrowed from a sibling; occupancy is restored.
    Fixed,
    /// Two nodes merged; the parent lost a child and may itself be deficient.
    Merged,
}

/// A unique ordered index mapping fixed-width keys to record ids.
///
/// All operations take `&self`; synchronization happens entirely through
/// page latches, so a tree shared behind an `Arc` supports concurrent
/// readers and writers.
pub struct BPlusTree<C: KeyComparator> {
    name: String,
    header_page_id: PageId,
    cache: Arc<PageCache>,
    comparator: C,
    leaf_max_size: u16,
    internal_max_size: u16,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates a new index, formatting `header_page_id` as an empty tree.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        cache: Arc<PageCache>,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        validate_fanout(leaf_max_size, internal_max_size)?;
        {
            let mut guard = cache.write_page(header_page_id)?;
            HeaderViewMut::init(guard.data_mut());
        }
        Ok(Self {
            name: name.into(),
            header_page_id,
            cache,
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Opens an existing index without touching its header.
    pub fn open(
        name: impl Into<String>,
        header_page_id: PageId,
        cache: Arc<PageCache>,
        comparator: C,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Self> {
        validate_fanout(leaf_max_size, internal_max_size)?;
        {
            let guard = cache.read_page(header_page_id)?;
            HeaderView::new(guard.data(), header_page_id)?;
        }
        Ok(Self {
            name: name.into(),
            header_page_id,
            cache,
            comparator,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current root page id, `INVALID` when the tree is empty.
    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.cache.read_page(self.header_page_id)?;
        Ok(HeaderView::new(guard.data(), self.header_page_id)?.root_page_id())
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root_page_id()?.is_valid())
    }

    /// Point lookup. Returns the record id stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<RecordId>> {
        self.check_key(key)?;

        let root_id = self.root_page_id()?;
        if !root_id.is_valid() {
            return Ok(None);
        }

        let mut guard = self.cache.read_page(root_id)?;
        loop {
            let page_id = guard.page_id();
            match page_type(guard.data(), page_id)? {
                PageType::Leaf => {
                    let view = LeafView::new(guard.data(), page_id)?;
                    return Ok(view
                        .point_search(&self.comparator, key)
                        .map(|slot| view.record_at(slot)));
                }
                PageType::Internal => {
                    let child = {
                        let view = InternalView::new(guard.data(), page_id)?;
                        let slot = view.route(&self.comparator, key);
                        view.child_at(slot)
                    };
                    if !child.is_valid() {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "invalid child pointer in {page_id}"
                        )));
                    }
                    // The child guard is acquired before the parent's drops.
                    guard = self.cache.read_page(child)?;
                }
                other => return Err(unexpected_page(page_id, other)),
            }
        }
    }

    /// Unique insertion. Returns false, leaving the tree untouched, when an
    /// equal key is already present.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> Result<bool> {
        self.check_key(key)?;

        let mut ctx = Context::new();
        let mut header_guard = self.cache.write_page(self.header_page_id)?;
        ctx.root_page_id = HeaderView::new(header_guard.data(), self.header_page_id)?.root_page_id();

        if !ctx.root_page_id.is_valid() {
            // Empty tree: the first entry becomes a single-leaf root.
            let root_id = self.cache.new_page()?;
            {
                let mut guard = self.cache.write_page(root_id)?;
                let mut leaf = LeafViewMut::init(guard.data_mut(), self.leaf_max_size);
                leaf.set_key_at(0, key);
                leaf.set_record_at(0, rid);
                leaf.set_size(1);
            }
            HeaderViewMut::new(header_guard.data_mut(), self.header_page_id)?
                .set_root_page_id(root_id);
            debug!(tree = %self.name, root = %root_id, "created root leaf");
            return Ok(true);
        }
        ctx.header = Some(header_guard);

        let mut leaf_guard = self.descend_for_write(&mut ctx, key)?;
        let leaf_id = leaf_guard.page_id();

        let (pos, duplicate, leaf_size) = {
            let view = LeafView::new(leaf_guard.data(), leaf_id)?;
            let pos = view.insert_position(&self.comparator, key);
            let duplicate = pos < view.size()
                && self.comparator.compare(view.key_at(pos), key) == Ordering::Equal;
            (pos, duplicate, view.size())
        };
        if duplicate {
            return Ok(false);
        }

        if leaf_size < self.leaf_max_size as usize {
            // Safe leaf: it absorbs the entry without splitting, so every
            // ancestor guard can go before the page is touched.
            ctx.release_all();
            LeafViewMut::new(leaf_guard.data_mut(), leaf_id)?.insert_at(pos, key, rid);
            return Ok(true);
        }

        // Leaf split. The left page keeps ceil((max+1)/2) of the max+1
        // logical entries; the new right page takes the rest and the old
        // next pointer.
        let first = (self.leaf_max_size as usize + 2) / 2;
        let new_leaf_id = self.cache.new_page()?;
        let mut new_leaf_guard = self.cache.write_page(new_leaf_id)?;

        let mut split_key;
        {
            let (mut entries, old_next) = {
                let view = LeafView::new(leaf_guard.data(), leaf_id)?;
                (view.entries(), view.next_page_id())
            };
            entries.insert(pos, (copy_key(key), rid));

            let mut old_leaf = LeafViewMut::new(leaf_guard.data_mut(), leaf_id)?;
            old_leaf.write_entries(&entries[..first]);
            old_leaf.set_next_page_id(new_leaf_id);

            let mut new_leaf = LeafViewMut::init(new_leaf_guard.data_mut(), self.leaf_max_size);
            new_leaf.write_entries(&entries[first..]);
            new_leaf.set_next_page_id(old_next);

            split_key = entries[first].0;
        }
        debug!(tree = %self.name, left = %leaf_id, right = %new_leaf_id, "leaf split");
        drop(new_leaf_guard);
        drop(leaf_guard);

        // Cascade the new separator upward until a parent absorbs it.
        let mut split_child = new_leaf_id;
        let mut root_split = true;

        while let Some(mut parent_guard) = ctx.write_set.pop_back() {
            let slot = ctx.slot_path.pop().ok_or_else(path_out_of_sync)?;
            let insert_index = slot + 1;
            let parent_id = parent_guard.page_id();

            let (size, max_size) = {
                let view = InternalView::new(parent_guard.data(), parent_id)?;
                (view.size(), view.max_size())
            };

            if size < max_size {
                let mut pairs = InternalView::new(parent_guard.data(), parent_id)?.entries();
                pairs.insert(insert_index, (split_key, split_child));
                InternalViewMut::new(parent_guard.data_mut(), parent_id)?.write_entries(&pairs);
                root_split = false;
                ctx.release_all();
                break;
            }

            // Full parent: split it as well. The pair landing at index
            // `first` promotes its key; its child leads the new right page.
            let first = (self.internal_max_size as usize + 2) / 2;
            let new_internal_id = self.cache.new_page()?;
            let mut new_internal_guard = self.cache.write_page(new_internal_id)?;

            let mut pairs = InternalView::new(parent_guard.data(), parent_id)?.entries();
            pairs.insert(insert_index, (split_key, split_child));
            let promoted = pairs[first].0;

            InternalViewMut::new(parent_guard.data_mut(), parent_id)?
                .write_entries(&pairs[..first]);
            InternalViewMut::init(new_internal_guard.data_mut(), self.internal_max_size)
                .write_entries(&pairs[first..]);

            debug!(tree = %self.name, left = %parent_id, right = %new_internal_id, "internal split");
            split_key = promoted;
            split_child = new_internal_id;
        }

        if root_split {
            // The old root itself split: promote a fresh internal root.
            let new_root_id = self.cache.new_page()?;
            {
                let mut guard = self.cache.write_page(new_root_id)?;
                let mut root = InternalViewMut::init(guard.data_mut(), self.internal_max_size);
                root.set_child_at(0, ctx.root_page_id);
                root.set_key_at(1, &split_key);
                root.set_child_at(1, split_child);
                root.set_size(2);
            }
            let header = ctx.header.as_mut().ok_or_else(path_out_of_sync)?;
            HeaderViewMut::new(header.data_mut(), self.header_page_id)?
                .set_root_page_id(new_root_id);
            debug!(tree = %self.name, root = %new_root_id, "root split");
        }

        Ok(true)
    }

    /// Deletes `key` if present. Returns false for an absent key.
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;

        let mut ctx = Context::new();
        let header_guard = self.cache.write_page(self.header_page_id)?;
        ctx.root_page_id = HeaderView::new(header_guard.data(), self.header_page_id)?.root_page_id();
        if !ctx.root_page_id.is_valid() {
            return Ok(false);
        }
        ctx.header = Some(header_guard);

        let mut leaf_guard = self.descend_for_write(&mut ctx, key)?;
        let leaf_id = leaf_guard.page_id();

        let pos = match LeafView::new(leaf_guard.data(), leaf_id)?
            .point_search(&self.comparator, key)
        {
            Some(pos) => pos,
            None => return Ok(false),
        };

        let size_after = LeafView::new(leaf_guard.data(), leaf_id)?.size() - 1;

        if ctx.write_set.is_empty() {
            // The root is this leaf; occupancy bounds do not apply, but the
            // tree becomes empty when its last entry goes.
            LeafViewMut::new(leaf_guard.data_mut(), leaf_id)?.remove_at(pos);
            if size_after == 0 {
                let header = ctx.header.as_mut().ok_or_else(path_out_of_sync)?;
                HeaderViewMut::new(header.data_mut(), self.header_page_id)?
                    .set_root_page_id(PageId::INVALID);
                drop(leaf_guard);
                self.cache.delete_page(leaf_id);
                debug!(tree = %self.name, "tree emptied");
            }
            return Ok(true);
        }

        let min_leaf = (self.leaf_max_size as usize + 1) / 2;
        if size_after >= min_leaf {
            // Safe leaf: the deletion cannot underflow it.
            ctx.release_all();
            LeafViewMut::new(leaf_guard.data_mut(), leaf_id)?.remove_at(pos);
            return Ok(true);
        }

        LeafViewMut::new(leaf_guard.data_mut(), leaf_id)?.remove_at(pos);

        // Restore occupancy bottom-up: borrow from a sibling when one has
        // spare entries, merge otherwise and continue with the parent.
        let mut node_guard = leaf_guard;
        loop {
            let mut parent_guard = ctx.write_set.pop_back().ok_or_else(path_out_of_sync)?;
            let slot = ctx.slot_path.pop().ok_or_else(path_out_of_sync)?;

            let node_id = node_guard.page_id();
            let outcome = match page_type(node_guard.data(), node_id)? {
                PageType::Leaf => self.rebalance_leaf(&mut parent_guard, node_guard, slot)?,
                PageType::Internal => {
                    self.rebalance_internal(&mut parent_guard, node_guard, slot)?
                }
                other => return Err(unexpected_page(node_id, other)),
            };

            if matches!(outcome, Rebalance::Fixed) {
                return Ok(true);
            }

            let parent_id = parent_guard.page_id();
            let parent_size = InternalView::new(parent_guard.data(), parent_id)?.size();

            if ctx.write_set.is_empty() {
                // The parent is the root; it may shrink to a single child,
                // which then becomes the new root.
                if parent_size == 1 {
                    let only_child =
                        InternalView::new(parent_guard.data(), parent_id)?.child_at(0);
                    let header = ctx.header.as_mut().ok_or_else(path_out_of_sync)?;
                    HeaderViewMut::new(header.data_mut(), self.header_page_id)?
                        .set_root_page_id(only_child);
                    debug!(tree = %self.name, old = %parent_id, new = %only_child, "root collapsed");
                    drop(parent_guard);
                    self.cache.delete_page(parent_id);
                }
                return Ok(true);
            }

            let min_internal = (self.internal_max_size as usize + 1) / 2;
            if parent_size >= min_internal {
                return Ok(true);
            }
            node_guard = parent_guard;
        }
    }

    /// Iterates the whole tree in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator<'_>> {
        let root_id = self.root_page_id()?;
        if !root_id.is_valid() {
            return Ok(TreeIterator::empty(&self.cache));
        }

        let mut guard = self.cache.read_page(root_id)?;
        loop {
            let page_id = guard.page_id();
            match page_type(guard.data(), page_id)? {
                PageType::Leaf => return Ok(TreeIterator::new(&self.cache, guard, 0)),
                PageType::Internal => {
                    let child = InternalView::new(guard.data(), page_id)?.child_at(0);
                    guard = self.cache.read_page(child)?;
                }
                other => return Err(unexpected_page(page_id, other)),
            }
        }
    }

    /// Iterates in ascending key order starting at the first key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<TreeIterator<'_>> {
        self.check_key(key)?;

        let root_id = self.root_page_id()?;
        if !root_id.is_valid() {
            return Ok(TreeIterator::empty(&self.cache));
        }

        let mut guard = self.cache.read_page(root_id)?;
        loop {
            let page_id = guard.page_id();
            match page_type(guard.data(), page_id)? {
                PageType::Leaf => {
                    let slot = LeafView::new(guard.data(), page_id)?
                        .insert_position(&self.comparator, key);
                    return Ok(TreeIterator::new(&self.cache, guard, slot));
                }
                PageType::Internal => {
                    let child = {
                        let view = InternalView::new(guard.data(), page_id)?;
                        view.child_at(view.route(&self.comparator, key))
                    };
                    guard = self.cache.read_page(child)?;
                }
                other => return Err(unexpected_page(page_id, other)),
            }
        }
    }

    /// Verifies the structural invariants of the whole tree: key order,
    /// occupancy bounds, separator agreement, uniform leaf depth, and the
    /// leaf chain visiting every entry in ascending order.
    pub fn check_integrity(&self) -> Result<()> {
        let root_id = self.root_page_id()?;
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut leaf_depth = None;
        let (_, total) = self.verify_subtree(root_id, 0, true, &mut leaf_depth)?;

        let mut chain_count = 0usize;
        let mut prev_key: Option<[u8; KEY_SIZE]> = None;
        let mut current = self.leftmost_leaf_id(root_id)?;
        while current.is_valid() {
            let guard = self.cache.read_page(current)?;
            let view = LeafView::new(guard.data(), current)?;
            for i in 0..view.size() {
                let key = copy_key(view.key_at(i));
                if let Some(prev) = prev_key {
                    if self.comparator.compare(&prev, &key) != Ordering::Less {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "leaf chain out of order at {current}"
                        )));
                    }
                }
                prev_key = Some(key);
                chain_count += 1;
            }
            current = view.next_page_id();
        }

        if chain_count != total {
            return Err(KestrelError::TreeCorrupted(format!(
                "leaf chain visits {chain_count} entries, subtree walk found {total}"
            )));
        }
        Ok(())
    }

    // =====================================================================
    // Internals
    // =====================================================================

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != KEY_SIZE {
            return Err(KestrelError::InvalidKeyLength {
                len: key.len(),
                expected: KEY_SIZE,
            });
        }
        Ok(())
    }

    /// Pessimistic descent: exclusively latches from the root down to the
    /// target leaf, stashing ancestor guards and routing slots in `ctx`.
    /// Ancestors are only released once the mutation is proven safe.
    fn descend_for_write<'a>(
        &'a self,
        ctx: &mut Context<'a>,
        key: &[u8],
    ) -> Result<PageWriteGuard<'a>> {
        let mut guard = self.cache.write_page(ctx.root_page_id)?;
        loop {
            let page_id = guard.page_id();
            match page_type(guard.data(), page_id)? {
                PageType::Leaf => return Ok(guard),
                PageType::Internal => {
                    let (slot, child) = {
                        let view = InternalView::new(guard.data(), page_id)?;
                        let slot = view.route(&self.comparator, key);
                        (slot, view.child_at(slot))
                    };
                    if !child.is_valid() {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "invalid child pointer at slot {slot} of {page_id}"
                        )));
                    }
                    let child_guard = self.cache.write_page(child)?;
                    ctx.write_set.push_back(guard);
                    ctx.slot_path.push(slot);
                    guard = child_guard;
                }
                other => return Err(unexpected_page(page_id, other)),
            }
        }
    }

    /// Fixes an underfull leaf whose parent is exclusively latched. `slot`
    /// is the parent slot routing to `node`.
    fn rebalance_leaf(
        &self,
        parent: &mut PageWriteGuard<'_>,
        mut node: PageWriteGuard<'_>,
        slot: usize,
    ) -> Result<Rebalance> {
        let parent_id = parent.page_id();
        let node_id = node.page_id();
        let min = (self.leaf_max_size as usize + 1) / 2;

        let (right_id, left_id) = sibling_ids(parent, parent_id, slot)?;

        if right_id.is_valid() {
            let mut right = self.cache.write_page(right_id)?;
            if LeafView::new(right.data(), right_id)?.size() > min {
                // Move the right sibling's first pair to this leaf's end.
                let (bkey, brid) = {
                    let view = LeafView::new(right.data(), right_id)?;
                    (copy_key(view.key_at(0)), view.record_at(0))
                };
                {
                    let mut view = LeafViewMut::new(node.data_mut(), node_id)?;
                    let size = view.as_view().size();
                    view.insert_at(size, &bkey, brid);
                }
                LeafViewMut::new(right.data_mut(), right_id)?.remove_at(0);
                let new_sep = copy_key(LeafView::new(right.data(), right_id)?.key_at(0));
                InternalViewMut::new(parent.data_mut(), parent_id)?
                    .set_key_at(slot + 1, &new_sep);
                debug!(tree = %self.name, node = %node_id, from = %right_id, "leaf borrowed right");
                return Ok(Rebalance::Fixed);
            }
        }

        if left_id.is_valid() {
            let mut left = self.cache.write_page(left_id)?;
            let left_size = LeafView::new(left.data(), left_id)?.size();
            if left_size > min {
                // Move the left sibling's last pair to this leaf's front.
                let (bkey, brid) = {
                    let view = LeafView::new(left.data(), left_id)?;
                    (copy_key(view.key_at(left_size - 1)), view.record_at(left_size - 1))
                };
                LeafViewMut::new(left.data_mut(), left_id)?.remove_at(left_size - 1);
                LeafViewMut::new(node.data_mut(), node_id)?.insert_at(0, &bkey, brid);
                InternalViewMut::new(parent.data_mut(), parent_id)?.set_key_at(slot, &bkey);
                debug!(tree = %self.name, node = %node_id, from = %left_id, "leaf borrowed left");
                return Ok(Rebalance::Fixed);
            }
        }

        if right_id.is_valid() {
            // Absorb the right sibling and unlink it from the chain.
            let right = self.cache.write_page(right_id)?;
            let (right_entries, right_next) = {
                let view = LeafView::new(right.data(), right_id)?;
                (view.entries(), view.next_page_id())
            };
            {
                let mut entries = LeafView::new(node.data(), node_id)?.entries();
                entries.extend(right_entries);
                let mut view = LeafViewMut::new(node.data_mut(), node_id)?;
                view.write_entries(&entries);
                view.set_next_page_id(right_next);
            }
            remove_separator(parent, parent_id, slot + 1)?;
            debug!(tree = %self.name, into = %node_id, gone = %right_id, "leaf merged right");
            drop(right);
            self.cache.delete_page(right_id);
            return Ok(Rebalance::Merged);
        }

        if left_id.is_valid() {
            // Rightmost child: fold this leaf into its left sibling.
            let mut left = self.cache.write_page(left_id)?;
            let (node_entries, node_next) = {
                let view = LeafView::new(node.data(), node_id)?;
                (view.entries(), view.next_page_id())
            };
            {
                let mut entries = LeafView::new(left.data(), left_id)?.entries();
                entries.extend(node_entries);
                let mut view = LeafViewMut::new(left.data_mut(), left_id)?;
                view.write_entries(&entries);
                view.set_next_page_id(node_next);
            }
            remove_separator(parent, parent_id, slot)?;
            debug!(tree = %self.name, into = %left_id, gone = %node_id, "leaf merged left");
            drop(node);
            self.cache.delete_page(node_id);
            return Ok(Rebalance::Merged);
        }

        Err(KestrelError::TreeCorrupted(format!(
            "leaf {node_id} has no sibling under {parent_id}"
        )))
    }

    /// Fixes an underfull internal node; separators rotate through the
    /// parent so every child keeps covering its key range.
    fn rebalance_internal(
        &self,
        parent: &mut PageWriteGuard<'_>,
        mut node: PageWriteGuard<'_>,
        slot: usize,
    ) -> Result<Rebalance> {
        let parent_id = parent.page_id();
        let node_id = node.page_id();
        let min = (self.internal_max_size as usize + 1) / 2;

        let (right_id, left_id) = sibling_ids(parent, parent_id, slot)?;

        if right_id.is_valid() {
            let mut right = self.cache.write_page(right_id)?;
            if InternalView::new(right.data(), right_id)?.size() > min {
                // Separator comes down behind this node's last child; the
                // sibling's leading child crosses over and its first key
                // replaces the separator.
                let sep = copy_key(InternalView::new(parent.data(), parent_id)?.key_at(slot + 1));
                let (crossing_child, new_sep) = {
                    let view = InternalView::new(right.data(), right_id)?;
                    (view.child_at(0), copy_key(view.key_at(1)))
                };
                {
                    let mut pairs = InternalView::new(node.data(), node_id)?.entries();
                    pairs.push((sep, crossing_child));
                    InternalViewMut::new(node.data_mut(), node_id)?.write_entries(&pairs);
                }
                {
                    let mut pairs = InternalView::new(right.data(), right_id)?.entries();
                    pairs.remove(0);
                    InternalViewMut::new(right.data_mut(), right_id)?.write_entries(&pairs);
                }
                InternalViewMut::new(parent.data_mut(), parent_id)?
                    .set_key_at(slot + 1, &new_sep);
                debug!(tree = %self.name, node = %node_id, from = %right_id, "internal borrowed right");
                return Ok(Rebalance::Fixed);
            }
        }

        if left_id.is_valid() {
            let mut left = self.cache.write_page(left_id)?;
            let left_size = InternalView::new(left.data(), left_id)?.size();
            if left_size > min {
                let sep = copy_key(InternalView::new(parent.data(), parent_id)?.key_at(slot));
                let (crossing_key, crossing_child) = {
                    let view = InternalView::new(left.data(), left_id)?;
                    (copy_key(view.key_at(left_size - 1)), view.child_at(left_size - 1))
                };
                {
                    let mut pairs = InternalView::new(node.data(), node_id)?.entries();
                    // The old leading child now sits behind the separator.
                    pairs[0].0 = sep;
                    pairs.insert(0, ([0u8; KEY_SIZE], crossing_child));
                    InternalViewMut::new(node.data_mut(), node_id)?.write_entries(&pairs);
                }
                {
                    let mut pairs = InternalView::new(left.data(), left_id)?.entries();
                    pairs.pop();
                    InternalViewMut::new(left.data_mut(), left_id)?.write_entries(&pairs);
                }
                InternalViewMut::new(parent.data_mut(), parent_id)?
                    .set_key_at(slot, &crossing_key);
                debug!(tree = %self.name, node = %node_id, from = %left_id, "internal borrowed left");
                return Ok(Rebalance::Fixed);
            }
        }

        if right_id.is_valid() {
            let right = self.cache.write_page(right_id)?;
            let sep = copy_key(InternalView::new(parent.data(), parent_id)?.key_at(slot + 1));
            {
                let right_pairs = InternalView::new(right.data(), right_id)?.entries();
                let mut pairs = InternalView::new(node.data(), node_id)?.entries();
                pairs.push((sep, right_pairs[0].1));
                pairs.extend_from_slice(&right_pairs[1..]);
                InternalViewMut::new(node.data_mut(), node_id)?.write_entries(&pairs);
            }
            remove_separator(parent, parent_id, slot + 1)?;
            debug!(tree = %self.name, into = %node_id, gone = %right_id, "internal merged right");
            drop(right);
            self.cache.delete_page(right_id);
            return Ok(Rebalance::Merged);
        }

        if left_id.is_valid() {
            let mut left = self.cache.write_page(left_id)?;
            let sep = copy_key(InternalView::new(parent.data(), parent_id)?.key_at(slot));
            {
                let node_pairs = InternalView::new(node.data(), node_id)?.entries();
                let mut pairs = InternalView::new(left.data(), left_id)?.entries();
                pairs.push((sep, node_pairs[0].1));
                pairs.extend_from_slice(&node_pairs[1..]);
                InternalViewMut::new(left.data_mut(), left_id)?.write_entries(&pairs);
            }
            remove_separator(parent, parent_id, slot)?;
            debug!(tree = %self.name, into = %left_id, gone = %node_id, "internal merged left");
            drop(node);
            self.cache.delete_page(node_id);
            return Ok(Rebalance::Merged);
        }

        Err(KestrelError::TreeCorrupted(format!(
            "internal {node_id} has no sibling under {parent_id}"
        )))
    }

    fn leftmost_leaf_id(&self, root_id: PageId) -> Result<PageId> {
        let mut current = root_id;
        loop {
            let guard = self.cache.read_page(current)?;
            match page_type(guard.data(), current)? {
                PageType::Leaf => return Ok(current),
                PageType::Internal => {
                    current = InternalView::new(guard.data(), current)?.child_at(0);
                }
                other => return Err(unexpected_page(current, other)),
            }
        }
    }

    /// Recursive structure check. Returns the subtree's minimum key and its
    /// total entry count.
    fn verify_subtree(
        &self,
        page_id: PageId,
        depth: usize,
        is_root: bool,
        leaf_depth: &mut Option<usize>,
    ) -> Result<([u8; KEY_SIZE], usize)> {
        let guard = self.cache.read_page(page_id)?;
        match page_type(guard.data(), page_id)? {
            PageType::Leaf => {
                let view = LeafView::new(guard.data(), page_id)?;
                let size = view.size();
                let min = (self.leaf_max_size as usize + 1) / 2;
                if size == 0 || size > self.leaf_max_size as usize || (!is_root && size < min) {
                    return Err(KestrelError::TreeCorrupted(format!(
                        "leaf {page_id} occupancy {size} out of bounds"
                    )));
                }
                for i in 1..size {
                    if self.comparator.compare(view.key_at(i - 1), view.key_at(i))
                        != Ordering::Less
                    {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "leaf {page_id} keys out of order at slot {i}"
                        )));
                    }
                }
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "leaf {page_id} at depth {depth}, expected {expected}"
                        )));
                    }
                    _ => {}
                }
                Ok((copy_key(view.key_at(0)), size))
            }
            PageType::Internal => {
                let view = InternalView::new(guard.data(), page_id)?;
                let size = view.size();
                let min = (self.internal_max_size as usize + 1) / 2;
                if size == 0
                    || size > self.internal_max_size as usize
                    || (!is_root && size < min)
                {
                    return Err(KestrelError::TreeCorrupted(format!(
                        "internal {page_id} occupancy {size} out of bounds"
                    )));
                }
                for i in 2..size {
                    if self.comparator.compare(view.key_at(i - 1), view.key_at(i))
                        != Ordering::Less
                    {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "internal {page_id} keys out of order at slot {i}"
                        )));
                    }
                }

                let entries = view.entries();
                drop(guard);

                let mut seen = HashSet::new();
                for (_, child) in &entries {
                    if !child.is_valid() || !seen.insert(child.0) {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "internal {page_id} child pointers invalid or duplicated"
                        )));
                    }
                }

                let mut subtree_min = [0u8; KEY_SIZE];
                let mut total = 0;
                for (i, (key, child)) in entries.iter().enumerate() {
                    let (child_min, count) =
                        self.verify_subtree(*child, depth + 1, false, leaf_depth)?;
                    if i == 0 {
                        subtree_min = child_min;
                    } else if self.comparator.compare(key, &child_min) != Ordering::Equal {
                        return Err(KestrelError::TreeCorrupted(format!(
                            "internal {page_id} separator {i} disagrees with subtree minimum"
                        )));
                    }
                    total += count;
                }
                Ok((subtree_min, total))
            }
            other => Err(unexpected_page(page_id, other)),
        }
    }
}

fn validate_fanout(leaf_max_size: u16, internal_max_size: u16) -> Result<()> {
    if !(2..=MAX_LEAF_SLOTS).contains(&(leaf_max_size as usize)) {
        return Err(KestrelError::InvalidParameter {
            name: "leaf_max_size".to_string(),
            value: leaf_max_size.to_string(),
        });
    }
    if !(3..=MAX_INTERNAL_SLOTS).contains(&(internal_max_size as usize)) {
        return Err(KestrelError::InvalidParameter {
            name: "internal_max_size".to_string(),
            value: internal_max_size.to_string(),
        });
    }
    Ok(())
}

fn unexpected_page(page_id: PageId, found: PageType) -> KestrelError {
    KestrelError::PageCorrupted {
        page_id,
        reason: format!("unexpected {:?} page on descent", found),
    }
}

fn path_out_of_sync() -> KestrelError {
    KestrelError::TreeCorrupted("descent path out of sync".to_string())
}

/// Reads the ids of the routing slot's neighbours, `INVALID` where absent.
fn sibling_ids(
    parent: &PageWriteGuard<'_>,
    parent_id: PageId,
    slot: usize,
) -> Result<(PageId, PageId)> {
    let view = InternalView::new(parent.data(), parent_id)?;
    let right = if slot + 1 < view.size() {
        view.child_at(slot + 1)
    } else {
        PageId::INVALID
    };
    let left = if slot > 0 {
        view.child_at(slot - 1)
    } else {
        PageId::INVALID
    };
    Ok((right, left))
}

/// Drops the separator pair at `index` from an internal page.
fn remove_separator(
    parent: &mut PageWriteGuard<'_>,
    parent_id: PageId,
    index: usize,
) -> Result<()> {
    let mut pairs = InternalView::new(parent.data(), parent_id)?.entries();
    pairs.remove(index);
    InternalViewMut::new(parent.data_mut(), parent_id)?.write_entries(&pairs);
    Ok(())
}
