//! Buffer pool manager.

use crate::frame::{FrameId, PageFrame};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;
use kestrel_common::page::{PageId, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};

/// A dirty page that was evicted from the buffer pool.
/// Caller must write this back to disk to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 4096 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed array of page frames with a lock-free page table, a free
/// list for unused frames, clock replacement for eviction, and pin counting
/// for residency.
///
/// `fetch` and `unpin` may race freely; `admit`, `load`, and `discard` mutate
/// the page-to-frame mapping and must be serialized by the caller (the page
/// cache holds its miss lock across them).
pub struct BufferPool {
    config: BufferPoolConfig,
    frames: Vec<PageFrame>,
    page_table: PageTable,
    free_list: Mutex<Vec<FrameId>>,
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;
        let frames: Vec<_> = (0..num_frames)
            .map(|i| PageFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM, with a
    /// floor of 1,000 frames.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let num_frames = (available_bytes / 4 / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Fetches a resident page, pinning its frame. Returns None on a miss.
    #[inline]
    pub fn fetch(&self, page_id: PageId) -> Option<&PageFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Claims a frame for a new page: the free list first, then eviction.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok((frame_id, None));
            }
        }

        let victim_id = self.replacer.evict(&|fid| {
            let frame = &self.frames[fid.0 as usize];
            !frame.is_empty() && !frame.is_pinned()
        });

        if let Some(victim_id) = victim_id {
            let frame = &self.frames[victim_id.0 as usize];
            let victim_page = frame.page_id();
            debug!(page = %victim_page, frame = %victim_id, dirty = frame.is_dirty(), "evicting page");

            let evicted = if frame.is_dirty() {
                let mut data = Box::new([0u8; PAGE_SIZE]);
                frame.copy_to(&mut data);
                Some(EvictedPage {
                    page_id: victim_page,
                    data,
                })
            } else {
                None
            };

            self.page_table.remove(victim_page);
            return Ok((victim_id, evicted));
        }

        Err(KestrelError::BufferPoolFull)
    }

    /// Makes a page resident, pinning its frame.
    ///
    /// If the page is already resident, the existing frame is returned; the
    /// frame data is untouched either way except that a freshly claimed frame
    /// is zeroed. Any evicted dirty page is returned for write-back.
    pub fn admit(&self, page_id: PageId) -> Result<(&PageFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.pin();
        frame.set_page_id(page_id);
        self.replacer.record_access(frame_id);
        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Loads page data into the pool, pinning its frame.
    pub fn load(&self, page_id: PageId, data: &[u8]) -> Result<(&PageFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.admit(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Unpins a page, optionally marking it dirty. Returns false if the page
    /// is not resident.
    #[inline]
    pub fn unpin(&self, page_id: PageId, dirty: bool) -> bool {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if dirty {
                frame.set_dirty(true);
            }
            frame.unpin();
            return true;
        }
        false
    }

    /// Flushes a page through the provided callback if it is dirty.
    /// Returns true if the page was flushed.
    pub fn flush_with<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.latch_shared();
                flush_fn(page_id, &**data)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes all dirty pages through the provided callback.
    /// Returns the number of pages flushed.
    pub fn flush_all_with<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut resident = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            resident.push((page_id, frame_id));
            true
        });

        let mut flushed = 0;
        for (page_id, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.latch_shared();
                flush_fn(page_id, &**data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the pool without write-back.
    ///
    /// Returns false if the page is pinned or not resident.
    pub fn discard(&self, page_id: PageId) -> bool {
        if let Some(frame_id) = self.page_table.remove(page_id) {
            let frame = &self.frames[frame_id.0 as usize];

            if frame.is_pinned() {
                // Cannot drop a pinned page; restore the mapping.
                self.page_table.insert(page_id, frame_id);
                return false;
            }

            self.replacer.remove(frame_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
            return true;
        }
        false
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
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
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    #[test]
    fn test_pool_new() {
        let pool = test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_admit_pins_frame() {
        let pool = test_pool(10);

        let (frame, evicted) = pool.admit(PageId(1)).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), PageId(1));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert!(pool.contains(PageId(1)));
    }

    #[test]
    fn test_fetch_hit_and_miss() {
        let pool = test_pool(10);

        pool.admit(PageId(1)).unwrap();
        pool.unpin(PageId(1), false);

        let frame = pool.fetch(PageId(1)).unwrap();
        assert!(frame.is_pinned());
        assert!(pool.fetch(PageId(2)).is_none());
    }

    #[test]
    fn test_unpin_and_dirty_tracking() {
        let pool = test_pool(10);

        let (frame, _) = pool.admit(PageId(1)).unwrap();
        assert!(frame.is_pinned());

        pool.unpin(PageId(1), true);
        assert!(!frame.is_pinned());
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_admit_existing_page_reuses_frame() {
        let pool = test_pool(10);

        pool.admit(PageId(1)).unwrap();
        pool.unpin(PageId(1), false);

        let (frame, evicted) = pool.admit(PageId(1)).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), PageId(1));
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_eviction_of_clean_page() {
        let pool = test_pool(2);

        for i in 0..2 {
            pool.admit(PageId(i)).unwrap();
            pool.unpin(PageId(i), false);
        }
        assert_eq!(pool.free_count(), 0);

        let (_, evicted) = pool.admit(PageId(99)).unwrap();
        assert!(evicted.is_none()); // victim was clean
        assert_eq!(pool.page_count(), 2);
        assert!(pool.contains(PageId(99)));
    }

    #[test]
    fn test_eviction_returns_dirty_page() {
        let pool = test_pool(1);

        let (frame, _) = pool.admit(PageId(1)).unwrap();
        frame.latch_exclusive()[0] = 0xAB;
        pool.unpin(PageId(1), true);

        let (_, evicted) = pool.admit(PageId(2)).unwrap();
        let evicted = evicted.expect("dirty page must surface on eviction");
        assert_eq!(evicted.page_id, PageId(1));
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let pool = test_pool(2);

        pool.admit(PageId(1)).unwrap();
        pool.admit(PageId(2)).unwrap();

        let result = pool.admit(PageId(3));
        assert!(matches!(result, Err(KestrelError::BufferPoolFull)));
    }

    #[test]
    fn test_load_copies_data() {
        let pool = test_pool(10);
        let data = [0x5Au8; PAGE_SIZE];

        let (frame, _) = pool.load(PageId(1), &data).unwrap();
        assert_eq!(frame.latch_shared()[100], 0x5A);
    }

    #[test]
    fn test_admit_zeroes_reclaimed_frame() {
        let pool = test_pool(1);

        let (frame, _) = pool.load(PageId(1), &[0xFFu8; PAGE_SIZE]).unwrap();
        assert_eq!(frame.latch_shared()[0], 0xFF);
        pool.unpin(PageId(1), false);

        let (frame, _) = pool.admit(PageId(2)).unwrap();
        assert_eq!(frame.latch_shared()[0], 0);
    }

    #[test]
    fn test_flush_with() {
        let pool = test_pool(10);

        pool.admit(PageId(1)).unwrap();
        pool.unpin(PageId(1), true);

        let mut flushed_pages = vec![];
        let flushed = pool
            .flush_with(PageId(1), |pid, _data| {
                flushed_pages.push(pid);
                Ok(())
            })
            .unwrap();

        assert!(flushed);
        assert_eq!(flushed_pages, vec![PageId(1)]);

        // Second flush is a no-op: the page is clean now.
        let flushed = pool.flush_with(PageId(1), |_, _| Ok(())).unwrap();
        assert!(!flushed);
    }

    #[test]
    fn test_flush_all_with() {
        let pool = test_pool(10);

        for i in 0..5 {
            pool.admit(PageId(i)).unwrap();
            pool.unpin(PageId(i), true);
        }

        let flushed = pool.flush_all_with(|_, _| Ok(())).unwrap();
        assert_eq!(flushed, 5);
    }

    #[test]
    fn test_discard() {
        let pool = test_pool(10);

        pool.admit(PageId(1)).unwrap();
        pool.unpin(PageId(1), false);

        assert!(pool.discard(PageId(1)));
        assert!(!pool.contains(PageId(1)));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_discard_pinned_page_refused() {
        let pool = test_pool(10);

        pool.admit(PageId(1)).unwrap();

        assert!(!pool.discard(PageId(1)));
        assert!(pool.contains(PageId(1)));
    }

    #[test]
    fn test_stats() {
        let pool = test_pool(10);

        for i in 0..4 {
            pool.admit(PageId(i)).unwrap();
            if i % 2 == 0 {
                pool.unpin(PageId(i), true);
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 6);
        assert_eq!(stats.used_frames, 4);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 2);
    }
}
