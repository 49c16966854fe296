//! Pair-frequency multiset with a lazily invalidated max-heap.
//!
//! The authoritative count for every adjacent pair lives in a hash map. Each
//! mutation also pushes a `(count, pair)` snapshot onto a max-heap, and
//! `max` discards heap tops whose snapshot no longer matches the map. This
//! sidesteps decrease-key entirely: every operation stays O(log n)
//! amortized, with stale pops charged against the pushes that created them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::types::{Pair, PairCount};

/// Heap snapshot of a pair's count at some past moment.
///
/// Valid iff `count` still equals the map's current count for `pair`.
#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    count: PairCount,
    pair: Pair,
}

impl PartialOrd for Snapshot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Snapshot {
    fn cmp(&self, other: &Self) -> Ordering {
        // highest count at the heap top; ties go to the numerically larger
        // pair, which fixes the merge order when counts collide
        self.count
            .cmp(&other.count)
            .then_with(|| self.pair.cmp(&other.pair))
    }
}

#[derive(Debug, Default)]
pub(crate) struct PairMultiset {
    counts: FxHashMap<Pair, PairCount>,
    heap: BinaryHeap<Snapshot>,
}

impl PairMultiset {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records one more occurrence of `pair`.
    pub(crate) fn add(&mut self, pair: Pair) {
        let count = self.counts.entry(pair).or_insert(0);
        *count += 1;
        self.heap.push(Snapshot {
            count: *count,
            pair,
        });
    }

    /// Removes one occurrence of `pair`.
    ///
    /// Removing an absent pair is a no-op; a count that would reach zero
    /// erases the entry instead, so counts never go negative.
    pub(crate) fn remove(&mut self, pair: Pair) {
        let Some(count) = self.counts.get_mut(&pair) else {
            return;
        };
        if *count <= 1 {
            self.counts.remove(&pair);
        } else {
            *count -= 1;
            self.heap.push(Snapshot {
                count: *count,
                pair,
            });
        }
    }

    /// Returns the most frequent pair and its count, or `None` when no pairs
    /// remain.
    ///
    /// Pops stale snapshots off the heap until the top matches the
    /// authoritative map; the matching snapshot itself stays on the heap.
    pub(crate) fn max(&mut self) -> Option<(Pair, PairCount)> {
        while let Some(top) = self.heap.peek() {
            let (pair, count) = (top.pair, top.count);
            if self.counts.get(&pair) == Some(&count) {
                return Some((pair, count));
            }
            self.heap.pop();
        }
        None
    }

    /// Number of distinct pairs currently tracked.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }

    #[cfg(test)]
    pub(crate) fn count(&self, pair: Pair) -> PairCount {
        self.counts.get(&pair).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_max() {
        let mut set = PairMultiset::new();
        set.add((97, 98));
        set.add((97, 98));
        set.add((98, 99));
        assert_eq!(set.max(), Some(((97, 98), 2)));
    }

    #[test]
    fn test_max_skips_stale_snapshots() {
        let mut set = PairMultiset::new();
        for _ in 0..5 {
            set.add((1, 2));
        }
        set.add((3, 4));
        // knock (1, 2) below (3, 4); the old count-5 snapshot goes stale
        for _ in 0..5 {
            set.remove((1, 2));
        }
        assert_eq!(set.max(), Some(((3, 4), 1)));
        assert_eq!(set.count((1, 2)), 0);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut set = PairMultiset::new();
        set.remove((7, 7));
        assert_eq!(set.len(), 0);
        assert_eq!(set.max(), None);
    }

    #[test]
    fn test_remove_to_zero_erases() {
        let mut set = PairMultiset::new();
        set.add((1, 2));
        set.remove((1, 2));
        assert_eq!(set.len(), 0);
        assert_eq!(set.max(), None);
    }

    #[test]
    fn test_tie_broken_toward_larger_pair() {
        let mut set = PairMultiset::new();
        set.add((1, 1));
        set.add((2, 2));
        assert_eq!(set.max(), Some(((2, 2), 1)));
    }

    #[test]
    fn test_max_snapshot_matches_authoritative_count() {
        let mut set = PairMultiset::new();
        set.add((5, 6));
        set.add((5, 6));
        set.add((5, 6));
        set.remove((5, 6));
        let (pair, count) = set.max().expect("non-empty multiset");
        assert_eq!(count, set.count(pair));
    }

    #[test]
    fn test_empty_after_churn() {
        let mut set = PairMultiset::new();
        for i in 0..10 {
            set.add((i, i + 1));
        }
        for i in 0..10 {
            set.remove((i, i + 1));
        }
        assert_eq!(set.max(), None);
    }
}
