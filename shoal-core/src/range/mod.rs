//! Inclusive byte ranges and ordered range sets.
//!
//! Every byte position handled by the swarm engine is expressed through
//! [`Range`], an immutable inclusive `[low, high]` interval, and
//! [`IntervalSet`], an ordered collection of disjoint ranges.

mod interval_set;

use std::fmt;

pub use interval_set::IntervalSet;
use serde::Serialize;

/// Errors from constructing or translating ranges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Range bounds were given in the wrong order
    #[error("Inverted range: low {low} is greater than high {high}")]
    Inverted {
        /// Requested low bound
        low: u64,
        /// Requested high bound
        high: u64,
    },

    /// Range translation would leave the representable byte space
    #[error("Range {range} cannot be shifted by {delta}")]
    ShiftOverflow {
        /// Range being shifted
        range: Range,
        /// Requested shift amount
        delta: u64,
    },
}

/// Inclusive byte interval `[low, high]`.
///
/// A range always covers at least one byte. Ranges are plain `Copy`
/// values: every operation returns a new range instead of mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Range {
    low: u64,
    high: u64,
}

impl Range {
    /// Creates a range from already validated bounds.
    ///
    /// # Panics
    ///
    /// Panics if `low > high`. Use [`Range::try_new`] for untrusted input.
    pub fn new(low: u64, high: u64) -> Self {
        assert!(low <= high, "Range low {low} must not exceed high {high}");
        Self { low, high }
    }

    /// Creates a range, rejecting inverted bounds.
    ///
    /// # Errors
    ///
    /// - `RangeError::Inverted` - If `low > high`
    pub fn try_new(low: u64, high: u64) -> Result<Self, RangeError> {
        if low > high {
            return Err(RangeError::Inverted { low, high });
        }
        Ok(Self { low, high })
    }

    /// Creates the range of `length` bytes starting at `start`.
    ///
    /// Returns `None` for a zero length or when the end would overflow.
    pub fn with_length(start: u64, length: u64) -> Option<Self> {
        if length == 0 {
            return None;
        }
        let high = start.checked_add(length - 1)?;
        Some(Self { low: start, high })
    }

    /// First byte of the range.
    pub fn low(&self) -> u64 {
        self.low
    }

    /// Last byte of the range.
    pub fn high(&self) -> u64 {
        self.high
    }

    /// Number of bytes covered. Always at least one.
    ///
    /// The full `[0, u64::MAX]` span holds one byte more than `u64` can
    /// count and reports `u64::MAX`.
    pub fn length(&self) -> u64 {
        (self.high - self.low).saturating_add(1)
    }

    /// Whether `offset` falls inside the range.
    pub fn contains_offset(&self, offset: u64) -> bool {
        self.low <= offset && offset <= self.high
    }

    /// Whether `other` lies entirely inside this range.
    pub fn contains(&self, other: &Range) -> bool {
        self.low <= other.low && other.high <= self.high
    }

    /// Whether the two ranges share at least one byte.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    /// Whether the ranges touch end to end without sharing a byte.
    pub fn is_adjacent(&self, other: &Range) -> bool {
        self.high.checked_add(1) == Some(other.low) || other.high.checked_add(1) == Some(self.low)
    }

    /// Bytes shared by both ranges.
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Range {
            low: self.low.max(other.low),
            high: self.high.min(other.high),
        })
    }

    /// Joins overlapping or adjacent ranges into one.
    pub fn merge(&self, other: &Range) -> Option<Range> {
        if !self.overlaps(other) && !self.is_adjacent(other) {
            return None;
        }
        Some(Range {
            low: self.low.min(other.low),
            high: self.high.max(other.high),
        })
    }

    /// Translates the range towards zero by `delta` bytes.
    ///
    /// # Errors
    ///
    /// - `RangeError::ShiftOverflow` - If `delta` exceeds the low bound
    pub fn shift_down(&self, delta: u64) -> Result<Range, RangeError> {
        match (self.low.checked_sub(delta), self.high.checked_sub(delta)) {
            (Some(low), Some(high)) => Ok(Range { low, high }),
            _ => Err(RangeError::ShiftOverflow {
                range: *self,
                delta,
            }),
        }
    }

    /// Translates the range away from zero by `delta` bytes.
    ///
    /// # Errors
    ///
    /// - `RangeError::ShiftOverflow` - If the high bound would overflow
    pub fn shift_up(&self, delta: u64) -> Result<Range, RangeError> {
        match (self.low.checked_add(delta), self.high.checked_add(delta)) {
            (Some(low), Some(high)) => Ok(Range { low, high }),
            _ => Err(RangeError::ShiftOverflow {
                range: *self,
                delta,
            }),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.low, self.high)
    }
}
