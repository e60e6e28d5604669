//! Per-operation descent state for writers.

use std::collections::VecDeque;

use kestrel_common::page::PageId;

use crate::cache::PageWriteGuard;

/// Scratch state carried by a single insert or remove.
///
/// Owns the header guard and the exclusive guards along the descent path,
/// front = root-most. `slot_path[i]` is the child slot taken out of
/// `write_set[i]`, so the two stacks always have equal length; the leaf guard
/// itself stays with the operation, not in the stack.
pub(crate) struct Context<'a> {
    /// Header guard, held while the root identity may still change.
    pub header: Option<PageWriteGuard<'a>>,
    /// Root page id as read under the header guard.
    pub root_page_id: PageId,
    /// Exclusive guards on the internal pages of the descent path.
    pub write_set: VecDeque<PageWriteGuard<'a>>,
    /// Routing slot taken at each internal page in `write_set`.
    pub slot_path: Vec<usize>,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Self {
            header: None,
            root_page_id: PageId::INVALID,
            write_set: VecDeque::new(),
            slot_path: Vec::new(),
        }
    }

    /// Releases every guard: the mutation is proven safe for the node the
    /// caller kept, or the operation is finished.
    pub fn release_all(&mut self) {
        self.header = None;
        self.write_set.clear();
        self.slot_path.clear();
    }
}
