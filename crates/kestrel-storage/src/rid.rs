//! Record identifiers: the values stored in the index.

use serde::{Deserialize, Serialize};
use kestrel_common::page::PageId;

/// Location of a record in the table heap.
///
/// This is the opaque fixed-size value the index maps keys to. Its on-page
/// form is 8 bytes: page number, slot number, and two reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Heap page containing the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u16,
}

impl RecordId {
    /// On-page size in bytes.
    pub const SIZE: usize = 8;

    /// Invalid record ID.
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot: u16::MAX,
    };

    /// Creates a new record ID.
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }

    /// Returns true if this is a valid record ID.
    pub fn is_valid(&self) -> bool {
        self.page_id.is_valid()
    }

    /// Serializes the record ID to its on-page form.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_bytes());
        buf[4..6].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Deserializes a record ID from its on-page form.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::from_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_new() {
        let rid = RecordId::new(PageId(3), 7);
        assert_eq!(rid.page_id, PageId(3));
        assert_eq!(rid.slot, 7);
        assert!(rid.is_valid());
    }

    #[test]
    fn test_record_id_invalid() {
        assert!(!RecordId::INVALID.is_valid());
    }

    #[test]
    fn test_record_id_roundtrip() {
        for rid in [
            RecordId::new(PageId(0), 0),
            RecordId::new(PageId(900), 41),
            RecordId::INVALID,
        ] {
            assert_eq!(RecordId::from_bytes(&rid.to_bytes()), rid);
        }
    }

    #[test]
    fn test_record_id_display() {
        assert_eq!(RecordId::new(PageId(3), 7).to_string(), "page:3:7");
    }

    #[test]
    fn test_record_id_serde_roundtrip() {
        let original = RecordId::new(PageId(12), 34);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: RecordId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
