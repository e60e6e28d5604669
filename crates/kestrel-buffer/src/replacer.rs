//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// The caller supplies the eviction predicate: a frame may only be chosen as
/// a victim when `can_evict` returns true for it (typically: the frame holds
/// a page and is unpinned).
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction, or None if no frame qualifies.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets all replacement state for a frame.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// Reference bits are atomic so access recording is lock-free; only the clock
/// hand is behind a mutex, taken on the eviction path.
pub struct ClockReplacer {
    num_frames: usize,
    reference_bits: Vec<AtomicBool>,
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();

        // At most 2 full rotations: the first may only clear reference bits.
        for _ in 0..(2 * self.num_frames) {
            let frame_id = FrameId(*hand as u32);
            let idx = *hand;
            *hand = (*hand + 1) % self.num_frames;

            if !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[idx].swap(false, Ordering::Relaxed) {
                continue;
            }
            return Some(frame_id);
        }

        // Everything referenced on both passes: take any qualifying frame.
        (0..self.num_frames)
            .map(|i| FrameId(i as u32))
            .find(|&fid| can_evict(fid))
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_replacer_new() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
    }

    #[test]
    fn test_evict_none_qualify() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.evict(&|_| false), None);
    }

    #[test]
    fn test_evict_single_candidate() {
        let replacer = ClockReplacer::new(10);
        let victim = replacer.evict(&|fid| fid == FrameId(5));
        assert_eq!(victim, Some(FrameId(5)));
    }

    #[test]
    fn test_evict_prefers_unreferenced() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        // Frame 2 has no reference bit, so it is chosen first.
        let victim = replacer.evict(&|_| true);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_evict_all_referenced() {
        let replacer = ClockReplacer::new(3);

        for i in 0..3 {
            replacer.record_access(FrameId(i));
        }

        // The first rotation clears all bits; the second finds a victim.
        assert!(replacer.evict(&|_| true).is_some());
    }

    #[test]
    fn test_second_chance() {
        let replacer = ClockReplacer::new(2);

        replacer.record_access(FrameId(0));
        // Frame 1 unreferenced: evicted before frame 0.
        assert_eq!(replacer.evict(&|_| true), Some(FrameId(1)));
        // Frame 0's bit was cleared during the scan, so it goes next.
        assert_eq!(replacer.evict(&|_| true), Some(FrameId(0)));
    }

    #[test]
    fn test_remove_clears_reference_bit() {
        let replacer = ClockReplacer::new(2);

        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));

        // Bit cleared: frame 0 is immediately evictable.
        let victim = replacer.evict(&|fid| fid == FrameId(0));
        assert_eq!(victim, Some(FrameId(0)));
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let replacer = ClockReplacer::new(5);

        // These should not panic
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));
    }
}
