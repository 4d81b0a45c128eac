//! Depth bookkeeping shared by descent and unwind.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of levels currently present below the starting directory.
///
/// Only the active phase mutates it (descent increments, unwind decrements);
/// anything else, including an interrupt context, may read it at any time.
#[derive(Debug)]
pub struct DepthCounter {
    current: AtomicU64,
    max: u64,
}

impl DepthCounter {
    pub fn new(max: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            max,
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn is_bottom(&self) -> bool {
        self.current() >= self.max
    }

    /// Record one more level. Returns the new depth.
    pub fn increment(&self) -> u64 {
        let prev = self.current.fetch_add(1, Ordering::SeqCst);
        debug_assert!(prev < self.max, "depth counter overflow past {}", self.max);
        prev + 1
    }

    /// Record one level removed. Returns the new depth.
    pub fn decrement(&self) -> u64 {
        let prev = self.current.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "depth counter underflow");
        prev - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_up_and_down() {
        let depth = DepthCounter::new(3);
        assert_eq!(depth.current(), 0);
        assert_eq!(depth.increment(), 1);
        assert_eq!(depth.increment(), 2);
        assert!(!depth.is_bottom());
        assert_eq!(depth.increment(), 3);
        assert!(depth.is_bottom());
        assert_eq!(depth.decrement(), 2);
        assert_eq!(depth.max(), 3);
    }
}
