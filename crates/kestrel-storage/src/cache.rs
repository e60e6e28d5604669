//! Page cache: scoped latch guards over buffer pool frames.
//!
//! The cache composes the buffer pool with the disk manager. Callers obtain
//! pages exclusively through [`PageReadGuard`] and [`PageWriteGuard`]; each
//! guard pins its frame and holds the page latch for its whole lifetime, and
//! unlatches and unpins on drop by any path.

use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use kestrel_buffer::{BufferPool, BufferPoolConfig, PageFrame};
use kestrel_common::config::StorageConfig;
use kestrel_common::page::{PageId, PAGE_SIZE};
use kestrel_common::Result;

use crate::disk::{DiskManager, DiskManagerConfig};

/// Buffer pool facade handing out scoped page guards.
///
/// Cache misses read the page from disk; dirty pages pushed out by eviction
/// are written back before their frame is reused.
pub struct PageCache {
    pool: BufferPool,
    disk: DiskManager,
    /// Serializes miss handling and eviction so a page is loaded exactly once.
    miss_lock: Mutex<()>,
}

impl PageCache {
    /// Creates a page cache over the given disk manager.
    pub fn new(disk: DiskManager, pool_config: BufferPoolConfig) -> Self {
        Self {
            pool: BufferPool::new(pool_config),
            disk,
            miss_lock: Mutex::new(()),
        }
    }

    /// Opens a page cache from a storage configuration.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let disk = DiskManager::new(DiskManagerConfig {
            path: config.data_path.clone(),
            fsync_enabled: config.fsync_enabled,
        })?;
        Ok(Self::new(
            disk,
            BufferPoolConfig {
                num_frames: config.buffer_pool_pages,
            },
        ))
    }

    /// Allocates a fresh page backed by a zero-initialised frame on first
    /// access.
    pub fn new_page(&self) -> Result<PageId> {
        self.disk.allocate_page()
    }

    /// Acquires a shared latch on the page, blocking until available.
    pub fn read_page(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.ensure_resident(page_id)?;
        let latch = frame.latch_shared();
        Ok(PageReadGuard {
            cache: self,
            page_id,
            latch,
        })
    }

    /// Acquires an exclusive latch on the page, blocking until available.
    pub fn write_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.ensure_resident(page_id)?;
        let latch = frame.latch_exclusive();
        Ok(PageWriteGuard {
            cache: self,
            page_id,
            frame,
            latch,
        })
    }

    /// Returns the page's frame, pinned, loading it from disk on a miss.
    fn ensure_resident(&self, page_id: PageId) -> Result<&PageFrame> {
        if let Some(frame) = self.pool.fetch(page_id) {
            return Ok(frame);
        }

        let _miss = self.miss_lock.lock();
        if let Some(frame) = self.pool.fetch(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load(page_id, &data)?;
        if let Some(evicted) = evicted {
            if let Err(e) = self.disk.write_page(evicted.page_id, &evicted.data[..]) {
                self.pool.unpin(page_id, false);
                return Err(e);
            }
        }
        Ok(frame)
    }

    /// Drops a page from the pool without write-back. Returns false if the
    /// page is pinned or not resident.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let _miss = self.miss_lock.lock();
        self.pool.discard(page_id)
    }

    /// Writes all dirty resident pages back to disk and syncs the file.
    /// Returns the number of pages written.
    pub fn flush_all(&self) -> Result<usize> {
        let flushed = self
            .pool
            .flush_all_with(|page_id, data| self.disk.write_page(page_id, data))?;
        self.disk.flush()?;
        Ok(flushed)
    }

    /// Returns buffer pool statistics.
    pub fn stats(&self) -> kestrel_buffer::BufferPoolStats {
        self.pool.stats()
    }
}

/// Scoped shared guard over a pinned page frame.
///
/// Holds the read latch; other readers may share the page, writers block.
pub struct PageReadGuard<'a> {
    cache: &'a PageCache,
    page_id: PageId,
    latch: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl PageReadGuard<'_> {
    /// Returns the guarded page's identifier.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.cache.pool.unpin(self.page_id, false);
    }
}

/// Scoped exclusive guard over a pinned page frame.
///
/// Holds the write latch; no other guard can reference the page while this
/// guard lives. Mutable access marks the frame dirty.
pub struct PageWriteGuard<'a> {
    cache: &'a PageCache,
    page_id: PageId,
    frame: &'a PageFrame,
    latch: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl PageWriteGuard<'_> {
    /// Returns the guarded page's identifier.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Returns mutable page data, marking the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.set_dirty(true);
        &mut self.latch[..]
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.cache.pool.unpin(self.page_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_cache(num_frames: usize) -> (PageCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            path: dir.path().join("cache.dat"),
            fsync_enabled: false,
        })
        .unwrap();
        (PageCache::new(disk, BufferPoolConfig { num_frames }), dir)
    }

    #[test]
    fn test_new_page_is_zeroed() {
        let (cache, _dir) = test_cache(4);

        let page_id = cache.new_page().unwrap();
        let guard = cache.read_page(page_id).unwrap();
        assert_eq!(guard.page_id(), page_id);
        assert!(guard.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_then_read() {
        let (cache, _dir) = test_cache(4);

        let page_id = cache.new_page().unwrap();
        {
            let mut guard = cache.write_page(page_id).unwrap();
            guard.data_mut()[0] = 0xAB;
        }

        let guard = cache.read_page(page_id).unwrap();
        assert_eq!(guard.data()[0], 0xAB);
    }

    #[test]
    fn test_read_unknown_page_fails() {
        let (cache, _dir) = test_cache(4);
        assert!(cache.read_page(PageId(99)).is_err());
    }

    #[test]
    fn test_guard_releases_pin_on_drop() {
        let (cache, _dir) = test_cache(4);

        let page_id = cache.new_page().unwrap();
        {
            let _guard = cache.read_page(page_id).unwrap();
            assert_eq!(cache.stats().pinned_frames, 1);
        }
        assert_eq!(cache.stats().pinned_frames, 0);
    }

    #[test]
    fn test_shared_guards_coexist() {
        let (cache, _dir) = test_cache(4);

        let page_id = cache.new_page().unwrap();
        let g1 = cache.read_page(page_id).unwrap();
        let g2 = cache.read_page(page_id).unwrap();
        assert_eq!(g1.data()[0], g2.data()[0]);
    }

    #[test]
    fn test_eviction_writes_back_and_reloads() {
        // Pool of a single frame: every access to a second page evicts the
        // first, forcing a disk round-trip.
        let (cache, _dir) = test_cache(1);

        let p1 = cache.new_page().unwrap();
        let p2 = cache.new_page().unwrap();

        {
            let mut guard = cache.write_page(p1).unwrap();
            guard.data_mut()[0] = 0x11;
        }
        {
            let mut guard = cache.write_page(p2).unwrap();
            guard.data_mut()[0] = 0x22;
        }

        let guard = cache.read_page(p1).unwrap();
        assert_eq!(guard.data()[0], 0x11);
        drop(guard);

        let guard = cache.read_page(p2).unwrap();
        assert_eq!(guard.data()[0], 0x22);
    }

    #[test]
    fn test_delete_page() {
        let (cache, _dir) = test_cache(4);

        let page_id = cache.new_page().unwrap();
        {
            let mut guard = cache.write_page(page_id).unwrap();
            guard.data_mut()[0] = 1;
        }
        assert!(cache.delete_page(page_id));
        assert!(!cache.delete_page(page_id));
    }

    #[test]
    fn test_delete_latched_page_refused() {
        let (cache, _dir) = test_cache(4);

        let page_id = cache.new_page().unwrap();
        let _guard = cache.read_page(page_id).unwrap();
        assert!(!cache.delete_page(page_id));
    }

    #[test]
    fn test_flush_all() {
        let (cache, _dir) = test_cache(8);

        for _ in 0..3 {
            let page_id = cache.new_page().unwrap();
            let mut guard = cache.write_page(page_id).unwrap();
            guard.data_mut()[0] = 0x77;
        }

        assert_eq!(cache.flush_all().unwrap(), 3);
        assert_eq!(cache.flush_all().unwrap(), 0);
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_path: dir.path().join("open.dat"),
            buffer_pool_pages: 16,
            fsync_enabled: false,
            ..Default::default()
        };

        let cache = PageCache::open(&config).unwrap();
        let page_id = cache.new_page().unwrap();
        assert!(cache.read_page(page_id).is_ok());
    }
}
