//! Disk-resident B+tree index over fixed-size pages.
//!
//! The tree maps opaque 8-byte keys, ordered by a caller-supplied
//! comparator, to record ids. It is built entirely on the page cache: every
//! node is a page, all access goes through scoped latch guards, and
//! concurrent readers and writers coordinate by latch crabbing.
//!
//! Page roles:
//!
//! ```text
//!            +----------+      +------------------+
//!            |  Header  | ---> |  Internal (root) |
//!            +----------+      +------------------+
//!                               /                \
//!                    +----------+                +----------+
//!                    | Internal |      ...       | Internal |
//!                    +----------+                +----------+
//!                     /       \                    /      \
//!               +------+    +------+         +------+   +------+
//!               | Leaf | -> | Leaf |  -> ... | Leaf | -> | Leaf |
//!               +------+    +------+         +------+   +------+
//! ```
//!
//! Leaves link left-to-right in key order; the header is the single
//! mutation point for root identity.

pub mod compare;
pub mod constants;
mod context;
pub mod index;
pub mod iter;
pub mod page;

pub use compare::{KeyComparator, LexicographicComparator};
pub use constants::{KEY_SIZE, MAX_INTERNAL_SLOTS, MAX_LEAF_SLOTS};
pub use index::BPlusTree;
pub use iter::TreeIterator;
pub use page::{HeaderView, InternalView, LeafView};
