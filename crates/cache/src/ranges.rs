//! Set of resident byte ranges.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Sorted, non-overlapping, non-adjacent half-open byte ranges.
///
/// Inserting a range merges it with anything it overlaps or touches, so the
/// set is always in its most compact form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ranges(Vec<Range<u64>>);

impl Ranges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<u64>> {
        self.0.iter()
    }

    /// Total number of bytes covered.
    pub fn len(&self) -> u64 {
        self.0.iter().map(|r| r.end - r.start).sum()
    }

    pub fn insert(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        // First range that ends at or after the new start (touching counts).
        let first = self.0.partition_point(|r| r.end < range.start);
        // First range that starts strictly after the new end.
        let last = self.0.partition_point(|r| r.start <= range.end);
        let mut merged = range;
        if first < last {
            merged.start = merged.start.min(self.0[first].start);
            merged.end = merged.end.max(self.0[last - 1].end);
        }
        self.0.splice(first..last, [merged]);
    }

    /// Whether every byte of `range` is covered. Empty ranges are trivially
    /// present.
    pub fn present(&self, range: Range<u64>) -> bool {
        if range.is_empty() {
            return true;
        }
        let idx = self.0.partition_point(|r| r.end <= range.start);
        self.0.get(idx).is_some_and(|r| r.start <= range.start && r.end >= range.end)
    }

    /// The sub-ranges of `range` that are not covered, in order.
    pub fn missing(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        if range.is_empty() {
            return gaps;
        }
        let mut cursor = range.start;
        let idx = self.0.partition_point(|r| r.end <= range.start);
        for r in &self.0[idx..] {
            if r.start >= range.end {
                break;
            }
            if r.start > cursor {
                gaps.push(cursor..r.start);
            }
            cursor = cursor.max(r.end);
        }
        if cursor < range.end {
            gaps.push(cursor..range.end);
        }
        gaps
    }

    /// Drop everything at or beyond `size`.
    pub fn truncate(&mut self, size: u64) {
        self.0.retain(|r| r.start < size);
        if let Some(last) = self.0.last_mut() {
            last.end = last.end.min(size);
        }
    }
}
