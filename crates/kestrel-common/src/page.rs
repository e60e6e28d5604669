//! Page identifiers and type tags for KestrelDB storage.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (8 KB).
pub const PAGE_SIZE: usize = 8 * 1024;

/// Unique identifier for a page within the data file.
///
/// Page numbers are dense and 0-indexed; the all-ones value is reserved as
/// the `INVALID` sentinel meaning "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Reserved identifier meaning "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Returns true if this identifier refers to an actual page.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Serializes the identifier to its on-page form.
    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Deserializes the identifier from its on-page form.
    #[inline]
    pub fn from_bytes(buf: [u8; 4]) -> Self {
        PageId(u32::from_le_bytes(buf))
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

/// Page types in KestrelDB storage.
///
/// The tag is stored in the first byte of every page and distinguishes the
/// three on-page layouts of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated / zeroed page.
    Free = 0,
    /// Index header page holding the root identifier.
    Header = 1,
    /// B+tree internal page.
    Internal = 2,
    /// B+tree leaf page.
    Leaf = 3,
}

impl PageType {
    /// Decodes a type tag. Returns None for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PageType::Free),
            1 => Some(PageType::Header),
            2 => Some(PageType::Internal),
            3 => Some(PageType::Leaf),
            _ => None,
        }
    }
}
