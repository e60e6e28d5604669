//! Leaf-chain iteration.

use bytes::Bytes;

use crate::cache::{PageCache, PageReadGuard};
use crate::rid::RecordId;

use super::page::LeafView;

/// Forward iterator over the tree's entries in ascending key order.
///
/// Walks the leaf chain under shared latches, holding at most one leaf guard
/// at a time: the current guard is released before the successor is latched.
/// Iteration ends at the rightmost leaf; a page error along the chain also
/// ends it.
pub struct TreeIterator<'a> {
    cache: &'a PageCache,
    leaf: Option<PageReadGuard<'a>>,
    slot: usize,
}

impl<'a> TreeIterator<'a> {
    pub(crate) fn new(cache: &'a PageCache, leaf: PageReadGuard<'a>, slot: usize) -> Self {
        Self {
            cache,
            leaf: Some(leaf),
            slot,
        }
    }

    /// An iterator positioned past the last entry.
    pub(crate) fn empty(cache: &'a PageCache) -> Self {
        Self {
            cache,
            leaf: None,
            slot: 0,
        }
    }
}

impl Iterator for TreeIterator<'_> {
    type Item = (Bytes, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_page_id = {
                let guard = self.leaf.as_ref()?;
                let view = LeafView::new(guard.data(), guard.page_id()).ok()?;
                if self.slot < view.size() {
                    let key = Bytes::copy_from_slice(view.key_at(self.slot));
                    let rid = view.record_at(self.slot);
                    self.slot += 1;
                    return Some((key, rid));
                }
                view.next_page_id()
            };

            // Release the exhausted leaf before latching its successor.
            self.leaf = None;
            self.slot = 0;
            if !next_page_id.is_valid() {
                return None;
            }
            match self.cache.read_page(next_page_id) {
                Ok(guard) => self.leaf = Some(guard),
                Err(_) => return None,
            }
        }
    }
}
