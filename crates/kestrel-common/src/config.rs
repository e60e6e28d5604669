//! Configuration structures for KestrelDB.

use crate::error::{KestrelError, Result};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the data file.
    pub data_path: PathBuf,
    /// Buffer pool size in number of pages.
    pub buffer_pool_pages: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
    /// Maximum number of key/value pairs per leaf page.
    pub leaf_max_size: u16,
    /// Maximum number of child pointers per internal page.
    pub internal_max_size: u16,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./kestrel.dat"),
            buffer_pool_pages: 4096, // 32 MB with 8 KB pages
            fsync_enabled: true,
            leaf_max_size: 256,
            internal_max_size: 256,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * PAGE_SIZE
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_pool_pages == 0 {
            return Err(KestrelError::InvalidParameter {
                name: "buffer_pool_pages".to_string(),
                value: self.buffer_pool_pages.to_string(),
            });
        }
        if self.leaf_max_size < 2 {
            return Err(KestrelError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: self.leaf_max_size.to_string(),
            });
        }
        if self.internal_max_size < 3 {
            return Err(KestrelError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: self.internal_max_size.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_path, PathBuf::from("./kestrel.dat"));
        assert_eq!(config.buffer_pool_pages, 4096);
        assert!(config.fsync_enabled);
        assert_eq!(config.leaf_max_size, 256);
        assert_eq!(config.internal_max_size, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(config.buffer_pool_size_bytes(), 4096 * 8192);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = StorageConfig {
            buffer_pool_pages: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_fanout() {
        let config = StorageConfig {
            leaf_max_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StorageConfig {
            internal_max_size: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig {
            data_path: PathBuf::from("/var/lib/kestrel/index.dat"),
            buffer_pool_pages: 128,
            fsync_enabled: false,
            leaf_max_size: 64,
            internal_max_size: 32,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.data_path, deserialized.data_path);
        assert_eq!(original.buffer_pool_pages, deserialized.buffer_pool_pages);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
        assert_eq!(original.leaf_max_size, deserialized.leaf_max_size);
        assert_eq!(original.internal_max_size, deserialized.internal_max_size);
    }
}
