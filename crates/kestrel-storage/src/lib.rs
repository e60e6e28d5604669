//! Storage engine for KestrelDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O
//! - Page cache handing out scoped latch guards over buffer pool frames
//! - Record identifiers
//! - B+tree index engine with latch-crabbing concurrency

mod btree;
mod cache;
mod disk;
mod rid;

pub use btree::{
    BPlusTree, HeaderView, InternalView, KeyComparator, LeafView, LexicographicComparator,
    TreeIterator, KEY_SIZE, MAX_INTERNAL_SLOTS, MAX_LEAF_SLOTS,
};
pub use cache::{PageCache, PageReadGuard, PageWriteGuard};
pub use disk::{DiskManager, DiskManagerConfig};
pub use rid::RecordId;
