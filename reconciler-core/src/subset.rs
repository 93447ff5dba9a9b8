//! Partition subsets
//!
//! A [`PartitionSubset`] is a set of partitions of a single asset:
//!
//! - time-window assets keep sorted, disjoint, non-adjacent half-open index
//!   ranges, so set operations cost O(ranges) rather than O(partitions)
//! - static and dynamic assets keep an ordered key set
//! - unpartitioned assets keep a presence flag
//!
//! Every constructor canonicalizes, so two subsets holding the same partitions
//! compare and serialize identically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::partitions::{PartitionError, TimeWindowPartitions};

/// Half-open range of window indices `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: i64,
    pub end: i64,
}

impl IndexRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Sort, drop empties, and merge overlapping or adjacent ranges
fn canonicalize(mut ranges: Vec<IndexRange>) -> Vec<IndexRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort();
    let mut merged: Vec<IndexRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

fn union_ranges(left: &[IndexRange], right: &[IndexRange]) -> Vec<IndexRange> {
    let mut merged: Vec<IndexRange> = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() || j < right.len() {
        let take_left = j >= right.len() || (i < left.len() && left[i].start <= right[j].start);
        let next = if take_left {
            i += 1;
            left[i - 1]
        } else {
            j += 1;
            right[j - 1]
        };
        match merged.last_mut() {
            Some(last) if next.start <= last.end => last.end = last.end.max(next.end),
            _ => merged.push(next),
        }
    }
    merged
}

fn intersect_ranges(left: &[IndexRange], right: &[IndexRange]) -> Vec<IndexRange> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let start = left[i].start.max(right[j].start);
        let end = left[i].end.min(right[j].end);
        if start < end {
            out.push(IndexRange::new(start, end));
        }
        if left[i].end < right[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

fn subtract_ranges(left: &[IndexRange], right: &[IndexRange]) -> Vec<IndexRange> {
    let mut out = Vec::new();
    let mut j = 0;
    for range in left {
        let mut cursor = range.start;
        while j < right.len() && right[j].end <= cursor {
            j += 1;
        }
        let mut k = j;
        while k < right.len() && right[k].start < range.end {
            if right[k].start > cursor {
                out.push(IndexRange::new(cursor, right[k].start));
            }
            cursor = cursor.max(right[k].end);
            k += 1;
        }
        if cursor < range.end {
            out.push(IndexRange::new(cursor, range.end));
        }
    }
    out
}

/// A set of partitions of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionSubset {
    /// Unpartitioned asset: the single instance is either in the set or not
    Unpartitioned { present: bool },

    /// Time-window asset: canonical index ranges over `partitions`
    TimeWindow {
        partitions: TimeWindowPartitions,
        ranges: Vec<IndexRange>,
    },

    /// Static or dynamic asset: ordered keys
    Keys { keys: BTreeSet<String> },
}

impl PartitionSubset {
    pub fn unpartitioned(present: bool) -> Self {
        PartitionSubset::Unpartitioned { present }
    }

    /// Build a time-window subset, canonicalizing the ranges
    pub fn from_ranges(partitions: TimeWindowPartitions, ranges: Vec<IndexRange>) -> Self {
        PartitionSubset::TimeWindow {
            partitions,
            ranges: canonicalize(ranges),
        }
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PartitionSubset::Keys {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Empty subset of the same partitioning
    pub fn empty_like(&self) -> Self {
        match self {
            PartitionSubset::Unpartitioned { .. } => PartitionSubset::unpartitioned(false),
            PartitionSubset::TimeWindow { partitions, .. } => PartitionSubset::TimeWindow {
                partitions: partitions.clone(),
                ranges: Vec::new(),
            },
            PartitionSubset::Keys { .. } => PartitionSubset::Keys {
                keys: BTreeSet::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PartitionSubset::Unpartitioned { present } => !present,
            PartitionSubset::TimeWindow { ranges, .. } => ranges.is_empty(),
            PartitionSubset::Keys { keys } => keys.is_empty(),
        }
    }

    /// Number of partitions in the subset
    pub fn len(&self) -> u64 {
        match self {
            PartitionSubset::Unpartitioned { present } => u64::from(*present),
            PartitionSubset::TimeWindow { ranges, .. } => ranges.iter().map(IndexRange::len).sum(),
            PartitionSubset::Keys { keys } => keys.len() as u64,
        }
    }

    /// Index ranges of a time-window subset
    pub fn ranges(&self) -> &[IndexRange] {
        match self {
            PartitionSubset::TimeWindow { ranges, .. } => ranges,
            _ => &[],
        }
    }

    /// Membership test. Unpartitioned subsets never contain a key.
    pub fn contains(&self, key: &str) -> bool {
        match self {
            PartitionSubset::Unpartitioned { .. } => false,
            PartitionSubset::TimeWindow { partitions, ranges } => {
                match partitions.aligned_index(key) {
                    Ok(index) => {
                        let pos = ranges.partition_point(|r| r.end <= index);
                        pos < ranges.len() && ranges[pos].start <= index
                    }
                    Err(_) => false,
                }
            }
            PartitionSubset::Keys { keys } => keys.contains(key),
        }
    }

    /// Ascending iteration over the partition keys. The iterator is lazy and
    /// can be cloned to restart.
    pub fn keys(&self) -> PartitionKeys<'_> {
        match self {
            PartitionSubset::Unpartitioned { .. } => PartitionKeys::Empty,
            PartitionSubset::TimeWindow { partitions, ranges } => PartitionKeys::Windows {
                partitions,
                ranges,
                range: 0,
                next: ranges.first().map(|r| r.start).unwrap_or_default(),
            },
            PartitionSubset::Keys { keys } => PartitionKeys::Keys(keys.iter()),
        }
    }

    pub fn first_key(&self) -> Option<String> {
        self.keys().next()
    }

    pub fn last_key(&self) -> Option<String> {
        match self {
            PartitionSubset::Unpartitioned { .. } => None,
            PartitionSubset::TimeWindow { partitions, ranges } => ranges
                .last()
                .and_then(|r| partitions.key_for_index(r.end - 1)),
            PartitionSubset::Keys { keys } => keys.iter().next_back().cloned(),
        }
    }

    /// The `n` most recent partitions (highest keys)
    pub fn take_last(&self, n: u64) -> Self {
        match self {
            PartitionSubset::Unpartitioned { present } => {
                PartitionSubset::unpartitioned(*present && n > 0)
            }
            PartitionSubset::TimeWindow { partitions, ranges } => {
                let mut remaining = n;
                let mut kept = Vec::new();
                for range in ranges.iter().rev() {
                    if remaining == 0 {
                        break;
                    }
                    let take = range.len().min(remaining);
                    kept.push(IndexRange::new(range.end - take as i64, range.end));
                    remaining -= take;
                }
                PartitionSubset::from_ranges(partitions.clone(), kept)
            }
            PartitionSubset::Keys { keys } => PartitionSubset::Keys {
                keys: keys.iter().rev().take(n as usize).cloned().collect(),
            },
        }
    }

    fn incompatible(&self, other: &Self) -> PartitionError {
        PartitionError::IncompatibleSubsets {
            left: self.describe(),
            right: other.describe(),
        }
    }

    fn describe(&self) -> String {
        match self {
            PartitionSubset::Unpartitioned { .. } => "unpartitioned".to_string(),
            PartitionSubset::TimeWindow { partitions, .. } => format!(
                "{} windows since {}",
                partitions.granularity(),
                partitions.start()
            ),
            PartitionSubset::Keys { .. } => "keyed".to_string(),
        }
    }

    pub fn union(&self, other: &Self) -> Result<Self, PartitionError> {
        match (self, other) {
            (Self::Unpartitioned { present: a }, Self::Unpartitioned { present: b }) => {
                Ok(Self::unpartitioned(*a || *b))
            }
            (
                Self::TimeWindow { partitions, ranges },
                Self::TimeWindow { partitions: theirs, ranges: other_ranges },
            ) if partitions == theirs => Ok(Self::TimeWindow {
                partitions: partitions.clone(),
                ranges: union_ranges(ranges, other_ranges),
            }),
            (Self::Keys { keys }, Self::Keys { keys: theirs }) => Ok(Self::Keys {
                keys: keys.union(theirs).cloned().collect(),
            }),
            _ => Err(self.incompatible(other)),
        }
    }

    pub fn intersect(&self, other: &Self) -> Result<Self, PartitionError> {
        match (self, other) {
            (Self::Unpartitioned { present: a }, Self::Unpartitioned { present: b }) => {
                Ok(Self::unpartitioned(*a && *b))
            }
            (
                Self::TimeWindow { partitions, ranges },
                Self::TimeWindow { partitions: theirs, ranges: other_ranges },
            ) if partitions == theirs => Ok(Self::TimeWindow {
                partitions: partitions.clone(),
                ranges: intersect_ranges(ranges, other_ranges),
            }),
            (Self::Keys { keys }, Self::Keys { keys: theirs }) => Ok(Self::Keys {
                keys: keys.intersection(theirs).cloned().collect(),
            }),
            _ => Err(self.incompatible(other)),
        }
    }

    pub fn subtract(&self, other: &Self) -> Result<Self, PartitionError> {
        match (self, other) {
            (Self::Unpartitioned { present: a }, Self::Unpartitioned { present: b }) => {
                Ok(Self::unpartitioned(*a && !*b))
            }
            (
                Self::TimeWindow { partitions, ranges },
                Self::TimeWindow { partitions: theirs, ranges: other_ranges },
            ) if partitions == theirs => Ok(Self::TimeWindow {
                partitions: partitions.clone(),
                ranges: subtract_ranges(ranges, other_ranges),
            }),
            (Self::Keys { keys }, Self::Keys { keys: theirs }) => Ok(Self::Keys {
                keys: keys.difference(theirs).cloned().collect(),
            }),
            _ => Err(self.incompatible(other)),
        }
    }
}

/// Iterator over the keys of a [`PartitionSubset`]
#[derive(Debug, Clone)]
pub enum PartitionKeys<'a> {
    Empty,
    Windows {
        partitions: &'a TimeWindowPartitions,
        ranges: &'a [IndexRange],
        range: usize,
        next: i64,
    },
    Keys(std::collections::btree_set::Iter<'a, String>),
}

impl Iterator for PartitionKeys<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self {
            PartitionKeys::Empty => None,
            PartitionKeys::Windows {
                partitions,
                ranges,
                range,
                next,
            } => loop {
                let current = ranges.get(*range)?;
                if *next < current.end {
                    let key = partitions.key_for_index(*next);
                    *next += 1;
                    return key;
                }
                *range += 1;
                *next = ranges.get(*range).map(|r| r.start).unwrap_or_default();
            },
            PartitionKeys::Keys(iter) => iter.next().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitions::TimeGranularity;

    fn hourly() -> TimeWindowPartitions {
        TimeWindowPartitions::parse(TimeGranularity::Hourly, "2024-01-01-00:00").unwrap()
    }

    fn windows(ranges: &[(i64, i64)]) -> PartitionSubset {
        PartitionSubset::from_ranges(
            hourly(),
            ranges.iter().map(|(s, e)| IndexRange::new(*s, *e)).collect(),
        )
    }

    #[test]
    fn test_from_ranges_canonicalizes() {
        let subset = windows(&[(5, 7), (0, 2), (2, 3), (6, 9), (10, 10)]);
        assert_eq!(subset.ranges(), &[IndexRange::new(0, 3), IndexRange::new(5, 9)]);
        assert_eq!(subset.len(), 7);
    }

    #[test]
    fn test_union_merges_adjacent_ranges() {
        let left = windows(&[(0, 3), (10, 12)]);
        let right = windows(&[(3, 5), (11, 15), (20, 21)]);
        let union = left.union(&right).unwrap();
        assert_eq!(
            union.ranges(),
            &[IndexRange::new(0, 5), IndexRange::new(10, 15), IndexRange::new(20, 21)]
        );
    }

    #[test]
    fn test_intersect_ranges() {
        let left = windows(&[(0, 5), (8, 12)]);
        let right = windows(&[(3, 9), (11, 20)]);
        let both = left.intersect(&right).unwrap();
        assert_eq!(
            both.ranges(),
            &[IndexRange::new(3, 5), IndexRange::new(8, 9), IndexRange::new(11, 12)]
        );
    }

    #[test]
    fn test_subtract_ranges() {
        let left = windows(&[(0, 10), (20, 30)]);
        let right = windows(&[(2, 4), (6, 8), (25, 40)]);
        let diff = left.subtract(&right).unwrap();
        assert_eq!(
            diff.ranges(),
            &[
                IndexRange::new(0, 2),
                IndexRange::new(4, 6),
                IndexRange::new(8, 10),
                IndexRange::new(20, 25)
            ]
        );
        assert!(left.subtract(&left).unwrap().is_empty());
    }

    #[test]
    fn test_contains_and_keys() {
        let subset = windows(&[(1, 3), (24, 25)]);
        assert!(subset.contains("2024-01-01-01:00"));
        assert!(!subset.contains("2024-01-01-00:00"));
        assert!(subset.contains("2024-01-02-00:00"));
        assert!(!subset.contains("garbage"));

        let keys: Vec<String> = subset.keys().collect();
        assert_eq!(
            keys,
            vec!["2024-01-01-01:00", "2024-01-01-02:00", "2024-01-02-00:00"]
        );
        assert_eq!(subset.first_key().as_deref(), Some("2024-01-01-01:00"));
        assert_eq!(subset.last_key().as_deref(), Some("2024-01-02-00:00"));
    }

    #[test]
    fn test_keys_iterator_is_restartable() {
        let subset = windows(&[(0, 2)]);
        let mut iter = subset.keys();
        let restart = iter.clone();
        assert!(iter.next().is_some());
        assert_eq!(restart.count(), 2);
    }

    #[test]
    fn test_take_last() {
        let subset = windows(&[(0, 3), (5, 7)]);
        assert_eq!(subset.take_last(3).ranges(), &[IndexRange::new(2, 3), IndexRange::new(5, 7)]);
        assert!(subset.take_last(0).is_empty());

        let keyed = PartitionSubset::from_keys(["a", "b", "c"]);
        assert_eq!(keyed.take_last(2), PartitionSubset::from_keys(["b", "c"]));
    }

    #[test]
    fn test_keyed_set_operations() {
        let left = PartitionSubset::from_keys(["a", "b", "c"]);
        let right = PartitionSubset::from_keys(["b", "d"]);
        assert_eq!(left.union(&right).unwrap().len(), 4);
        assert_eq!(left.intersect(&right).unwrap(), PartitionSubset::from_keys(["b"]));
        assert_eq!(left.subtract(&right).unwrap(), PartitionSubset::from_keys(["a", "c"]));
    }

    #[test]
    fn test_unpartitioned_set_operations() {
        let present = PartitionSubset::unpartitioned(true);
        let absent = PartitionSubset::unpartitioned(false);
        assert!(!present.union(&absent).unwrap().is_empty());
        assert!(present.intersect(&absent).unwrap().is_empty());
        assert!(!present.subtract(&absent).unwrap().is_empty());
        assert_eq!(present.len(), 1);
        assert_eq!(present.keys().count(), 0);
    }

    #[test]
    fn test_incompatible_subsets() {
        let hourly = windows(&[(0, 1)]);
        let daily = PartitionSubset::from_ranges(
            TimeWindowPartitions::parse(TimeGranularity::Daily, "2024-01-01").unwrap(),
            vec![IndexRange::new(0, 1)],
        );
        assert!(matches!(
            hourly.union(&daily),
            Err(PartitionError::IncompatibleSubsets { .. })
        ));
        assert!(hourly
            .subtract(&PartitionSubset::unpartitioned(true))
            .is_err());
    }

    #[test]
    fn test_empty_like_keeps_partitioning() {
        let subset = windows(&[(0, 4)]);
        let empty = subset.empty_like();
        assert!(empty.is_empty());
        assert!(subset.union(&empty).is_ok());
    }

    #[test]
    fn test_serialization_is_canonical() {
        let a = windows(&[(0, 2), (2, 4)]);
        let b = windows(&[(0, 4)]);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
