//! Lease selection strategies.

use crate::range::{IntervalSet, Range};

/// Picks the next range to lease out of the bytes still available.
///
/// `available` is already restricted to bytes that are both needed and
/// offered by the requesting source.
pub trait SelectionStrategy: Send + Sync {
    /// Chooses a range from `available`, or `None` if nothing fits.
    fn select(&self, available: &IntervalSet) -> Option<Range>;
}

/// Leases the lowest available bytes first.
///
/// Leases never exceed `max_lease_size`. When a lease has to be cut short,
/// its end is pulled back to a block boundary so neighbouring leases line
/// up with verification blocks.
#[derive(Debug, Clone)]
pub struct ContiguousSelector {
    max_lease_size: u64,
    block_size: u64,
}

impl ContiguousSelector {
    /// Creates a selector.
    ///
    /// # Panics
    ///
    /// Panics if `max_lease_size` or `block_size` is zero.
    pub fn new(max_lease_size: u64, block_size: u64) -> Self {
        assert!(max_lease_size > 0, "Max lease size must be greater than zero");
        assert!(block_size > 0, "Block size must be greater than zero");
        Self {
            max_lease_size,
            block_size,
        }
    }
}

impl SelectionStrategy for ContiguousSelector {
    fn select(&self, available: &IntervalSet) -> Option<Range> {
        let first = available.first()?;
        let capped_high = first
            .low()
            .saturating_add(self.max_lease_size - 1)
            .min(first.high());

        if capped_high == first.high() {
            return Some(Range::new(first.low(), capped_high));
        }

        // Pull the end back to the last block boundary if that keeps the lease non-empty
        let boundary = (capped_high + 1) / self.block_size * self.block_size;
        let high = if boundary > first.low() {
            boundary - 1
        } else {
            capped_high
        };
        Some(Range::new(first.low(), high))
    }
}
