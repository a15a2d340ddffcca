//! Ordered set of disjoint byte ranges.

use super::Range;

/// Set of non-overlapping ranges kept in ascending order.
///
/// Overlapping or adjacent ranges are merged on insert, so two stored
/// ranges always have at least one byte of gap between them. Lookups use
/// binary search over the sorted ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<Range>,
}

impl IntervalSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding exactly one range.
    pub fn singleton(range: Range) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    /// Adds a range, merging it with any overlapping or adjacent ranges.
    pub fn add(&mut self, range: Range) {
        let start = self
            .ranges
            .partition_point(|r| r.high().saturating_add(1) < range.low());

        let mut merged = range;
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].low() <= range.high().saturating_add(1)
        {
            let existing = self.ranges[end];
            merged = Range::new(
                merged.low().min(existing.low()),
                merged.high().max(existing.high()),
            );
            end += 1;
        }

        self.ranges.splice(start..end, std::iter::once(merged));
    }

    /// Adds every range of `other`.
    pub fn add_set(&mut self, other: &IntervalSet) {
        for range in &other.ranges {
            self.add(*range);
        }
    }

    /// Removes the bytes of `range`, splitting stored ranges where needed.
    pub fn remove(&mut self, range: Range) {
        let start = self.ranges.partition_point(|r| r.high() < range.low());

        let mut remainder = Vec::with_capacity(2);
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].low() <= range.high() {
            let existing = self.ranges[end];
            if existing.low() < range.low() {
                remainder.push(Range::new(existing.low(), range.low() - 1));
            }
            if existing.high() > range.high() {
                remainder.push(Range::new(range.high() + 1, existing.high()));
            }
            end += 1;
        }

        self.ranges.splice(start..end, remainder);
    }

    /// Removes every range of `other`.
    pub fn remove_set(&mut self, other: &IntervalSet) {
        for range in &other.ranges {
            self.remove(*range);
        }
    }

    /// Bytes of this set that fall inside `range`.
    pub fn intersect_range(&self, range: &Range) -> IntervalSet {
        let start = self.ranges.partition_point(|r| r.high() < range.low());
        let ranges = self.ranges[start..]
            .iter()
            .take_while(|r| r.low() <= range.high())
            .filter_map(|r| r.intersect(range))
            .collect();
        IntervalSet { ranges }
    }

    /// Bytes present in both sets.
    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut ranges = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            if let Some(shared) = a.intersect(&b) {
                ranges.push(shared);
            }
            if a.high() < b.high() {
                i += 1;
            } else {
                j += 1;
            }
        }

        IntervalSet { ranges }
    }

    /// Whether every byte of `range` is in the set.
    pub fn contains(&self, range: &Range) -> bool {
        let index = self.ranges.partition_point(|r| r.high() < range.low());
        self.ranges
            .get(index)
            .is_some_and(|candidate| candidate.contains(range))
    }

    /// Whether any byte of `range` is in the set.
    pub fn overlaps(&self, range: &Range) -> bool {
        let index = self.ranges.partition_point(|r| r.high() < range.low());
        self.ranges
            .get(index)
            .is_some_and(|candidate| candidate.low() <= range.high())
    }

    /// Lowest range in the set.
    pub fn first(&self) -> Option<Range> {
        self.ranges.first().copied()
    }

    /// Highest range in the set.
    pub fn last(&self) -> Option<Range> {
        self.ranges.last().copied()
    }

    /// Total number of bytes covered.
    pub fn byte_count(&self) -> u64 {
        self.ranges
            .iter()
            .fold(0u64, |total, range| total.saturating_add(range.length()))
    }

    /// Whether the set covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Stored ranges in ascending order.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Iterates the stored ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    /// Removes every range.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

impl From<Range> for IntervalSet {
    fn from(range: Range) -> Self {
        Self::singleton(range)
    }
}

impl FromIterator<Range> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = Range>>(iter: T) -> Self {
        let mut set = IntervalSet::new();
        for range in iter {
            set.add(range);
        }
        set
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn set_of(ranges: &[(u64, u64)]) -> IntervalSet {
        ranges.iter().map(|&(l, h)| Range::new(l, h)).collect()
    }

    #[test]
    fn test_add_merges_overlapping_and_adjacent() {
        let mut set = IntervalSet::new();
        set.add(Range::new(10, 19));
        set.add(Range::new(30, 39));
        assert_eq!(set.ranges().len(), 2);

        set.add(Range::new(20, 29));
        assert_eq!(set.ranges(), &[Range::new(10, 39)]);

        set.add(Range::new(0, 15));
        assert_eq!(set.ranges(), &[Range::new(0, 39)]);
        assert_eq!(set.byte_count(), 40);
    }

    #[test]
    fn test_add_keeps_gaps() {
        let set = set_of(&[(50, 59), (0, 9), (20, 29)]);
        assert_eq!(
            set.ranges(),
            &[Range::new(0, 9), Range::new(20, 29), Range::new(50, 59)]
        );
    }

    #[test]
    fn test_remove_splits_range() {
        let mut set = set_of(&[(0, 999)]);
        set.remove(Range::new(100, 199));
        assert_eq!(set.ranges(), &[Range::new(0, 99), Range::new(200, 999)]);

        set.remove(Range::new(0, 99));
        assert_eq!(set.ranges(), &[Range::new(200, 999)]);

        set.remove(Range::new(150, 250));
        assert_eq!(set.ranges(), &[Range::new(251, 999)]);
    }

    #[test]
    fn test_remove_spanning_several_ranges() {
        let mut set = set_of(&[(0, 9), (20, 29), (40, 49)]);
        set.remove(Range::new(5, 44));
        assert_eq!(set.ranges(), &[Range::new(0, 4), Range::new(45, 49)]);
    }

    #[test]
    fn test_intersections() {
        let set = set_of(&[(0, 99), (200, 299)]);
        assert_eq!(
            set.intersect_range(&Range::new(50, 249)).ranges(),
            &[Range::new(50, 99), Range::new(200, 249)]
        );

        let other = set_of(&[(90, 210), (290, 400)]);
        assert_eq!(
            set.intersect(&other).ranges(),
            &[Range::new(90, 99), Range::new(200, 210), Range::new(290, 299)]
        );
    }

    #[test]
    fn test_contains_and_overlaps() {
        let set = set_of(&[(0, 99), (200, 299)]);
        assert!(set.contains(&Range::new(10, 20)));
        assert!(!set.contains(&Range::new(90, 210)));
        assert!(set.overlaps(&Range::new(90, 210)));
        assert!(!set.overlaps(&Range::new(100, 199)));
    }

    #[test]
    fn test_extremes_do_not_overflow() {
        let mut set = IntervalSet::new();
        set.add(Range::new(u64::MAX - 1, u64::MAX));
        set.add(Range::new(0, u64::MAX - 2));
        assert_eq!(set.ranges(), &[Range::new(0, u64::MAX)]);
        assert_eq!(set.byte_count(), u64::MAX);

        set.remove(Range::new(u64::MAX, u64::MAX));
        assert_eq!(set.last(), Some(Range::new(0, u64::MAX - 1)));
    }

    fn to_bytes(set: &IntervalSet) -> BTreeSet<u64> {
        set.iter().flat_map(|r| r.low()..=r.high()).collect()
    }

    fn range_strategy() -> impl Strategy<Value = Range> {
        (0u64..200, 0u64..20).prop_map(|(low, len)| Range::new(low, low + len))
    }

    proptest! {
        #[test]
        fn test_set_matches_byte_model(
            ops in prop::collection::vec((any::<bool>(), range_strategy()), 0..40)
        ) {
            let mut set = IntervalSet::new();
            let mut model = BTreeSet::new();

            for (insert, range) in ops {
                if insert {
                    set.add(range);
                    model.extend(range.low()..=range.high());
                } else {
                    set.remove(range);
                    for b in range.low()..=range.high() {
                        model.remove(&b);
                    }
                }

                prop_assert_eq!(to_bytes(&set), model.clone());
                for pair in set.ranges().windows(2) {
                    prop_assert!(pair[0].high() + 1 < pair[1].low());
                }
            }
        }

        #[test]
        fn test_intersect_matches_byte_model(
            a in prop::collection::vec(range_strategy(), 0..10),
            b in prop::collection::vec(range_strategy(), 0..10),
        ) {
            let left: IntervalSet = a.into_iter().collect();
            let right: IntervalSet = b.into_iter().collect();

            let expected: BTreeSet<u64> = to_bytes(&left)
                .intersection(&to_bytes(&right))
                .copied()
                .collect();
            prop_assert_eq!(to_bytes(&left.intersect(&right)), expected);
        }
    }
}
