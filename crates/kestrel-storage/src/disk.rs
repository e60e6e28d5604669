//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use kestrel_common::page::{PageId, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path of the data file.
    pub path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./kestrel.dat"),
            fsync_enabled: true,
        }
    }
}

struct DiskState {
    file: File,
    num_pages: u32,
}

/// Manages reading and writing pages of a single data file.
///
/// Page numbers map directly to file offsets; allocation extends the file
/// with a zeroed page.
pub struct DiskManager {
    config: DiskManagerConfig,
    state: Mutex<DiskState>,
}

impl DiskManager {
    /// Opens or creates the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            state: Mutex::new(DiskState { file, num_pages }),
        })
    }

    /// Returns the data file path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.state.lock().num_pages
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut state = self.state.lock();

        if !page_id.is_valid() || page_id.0 >= state.num_pages {
            return Err(KestrelError::PageNotFound { page_id });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        state.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes a page to disk. `data` must be exactly one page long.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let mut state = self.state.lock();

        if !page_id.is_valid() {
            return Err(KestrelError::PageNotFound { page_id });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;

        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        if page_id.0 >= state.num_pages {
            state.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    /// Allocates a new page by extending the file with a zeroed page.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();

        let page_num = state.num_pages;
        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        state.num_pages = page_num + 1;
        Ok(PageId(page_num))
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.state.lock().file.sync_all();
    }
}
