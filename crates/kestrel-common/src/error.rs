//! Error types for KestrelDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Errors that can occur in KestrelDB operations.
#[derive(Debug, Error)]
pub enum KestrelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Page cache errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Index errors
    #[error("Invalid key length: {len} bytes (expected {expected})")]
    InvalidKeyLength { len: usize, expected: usize },

    #[error("B+tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: KestrelError = io_err.into();
        assert!(matches!(err, KestrelError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = KestrelError::PageNotFound { page_id: PageId(42) };
        assert_eq!(err.to_string(), "Page not found: page:42");
    }

    #[test]
    fn test_page_corrupted_display() {
        let err = KestrelError::PageCorrupted {
            page_id: PageId(100),
            reason: "bad type tag".to_string(),
        };
        assert_eq!(err.to_string(), "Page corrupted: page:100, reason: bad type tag");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = KestrelError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_invalid_key_length_display() {
        let err = KestrelError::InvalidKeyLength { len: 3, expected: 8 };
        assert_eq!(err.to_string(), "Invalid key length: 3 bytes (expected 8)");
    }

    #[test]
    fn test_tree_corrupted_display() {
        let err = KestrelError::TreeCorrupted("routing slot out of range".to_string());
        assert_eq!(err.to_string(), "B+tree corrupted: routing slot out of range");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = KestrelError::InvalidParameter {
            name: "leaf_max_size".to_string(),
            value: "1".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: leaf_max_size = 1");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(KestrelError::BufferPoolFull)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KestrelError>();
    }
}
