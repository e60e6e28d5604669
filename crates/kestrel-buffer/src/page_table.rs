//! Lock-free page table mapping page IDs to frame IDs.

use crate::frame::FrameId;
use kestrel_common::page::PageId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel for an empty slot.
const EMPTY: u64 = u64::MAX;

/// Sentinel for a deleted slot (tombstone).
const TOMBSTONE: u64 = u64::MAX - 1;

/// Packs a (page_id, frame_id) pair into a single word so that lookups and
/// updates are one atomic operation.
#[inline(always)]
fn pack(page_id: PageId, frame_id: FrameId) -> u64 {
    ((page_id.0 as u64) << 32) | (frame_id.0 as u64)
}

/// Lock-free page table using open addressing with linear probing.
///
/// Each slot holds a packed (page_id, frame_id) entry in one atomic word, so
/// readers never observe a key without its value.
pub struct PageTable {
    slots: Box<[AtomicU64]>,
    /// Bitmask for slot indexing (slot count - 1).
    mask: usize,
}

impl PageTable {
    /// Creates a new page table with capacity for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        // Next power of 2, 2x capacity for ~50% load factor
        let size = (capacity * 2).next_power_of_two().max(1024);
        let slots: Box<[AtomicU64]> = (0..size).map(|_| AtomicU64::new(EMPTY)).collect();

        Self {
            slots,
            mask: size - 1,
        }
    }

    #[inline(always)]
    fn slot_index(&self, page_id: PageId) -> usize {
        // FxHash-style multiply for distribution
        let hash = (page_id.0 as u64).wrapping_mul(0x517cc1b727220a95);
        (hash as usize) & self.mask
    }

    /// Looks up a page ID and returns its frame ID if present.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        let mut idx = self.slot_index(page_id);

        for _ in 0..self.slots.len() {
            let entry = self.slots[idx].load(Ordering::Acquire);
            if entry == EMPTY {
                return None;
            }
            if entry != TOMBSTONE && (entry >> 32) as u32 == page_id.0 {
                return Some(FrameId(entry as u32));
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Inserts or updates a page ID to frame ID mapping. Returns false if the
    /// table is full.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) -> bool {
        let packed = pack(page_id, frame_id);
        let mut idx = self.slot_index(page_id);

        for _ in 0..self.slots.len() {
            let entry = self.slots[idx].load(Ordering::Acquire);
            if entry == EMPTY || entry == TOMBSTONE || (entry >> 32) as u32 == page_id.0 {
                self.slots[idx].store(packed, Ordering::Release);
                return true;
            }
            idx = (idx + 1) & self.mask;
        }
        false
    }

    /// Removes a page ID mapping. Returns the frame ID if it was present.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        let mut idx = self.slot_index(page_id);

        for _ in 0..self.slots.len() {
            let entry = self.slots[idx].load(Ordering::Acquire);
            if entry == EMPTY {
                return None;
            }
            if entry != TOMBSTONE && (entry >> 32) as u32 == page_id.0 {
                self.slots[idx].store(TOMBSTONE, Ordering::Release);
                return Some(FrameId(entry as u32));
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Returns true if the page ID is in the table.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.get(page_id).is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| {
                let entry = s.load(Ordering::Relaxed);
                entry != EMPTY && entry != TOMBSTONE
            })
            .count()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all entries, calling the provided function for each.
    /// Returns early if the function returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        for slot in self.slots.iter() {
            let entry = slot.load(Ordering::Relaxed);
            if entry != EMPTY && entry != TOMBSTONE {
                let page_id = PageId((entry >> 32) as u32);
                let frame_id = FrameId(entry as u32);
                if !f(page_id, frame_id) {
                    return;
                }
            }
        }
    }
}
