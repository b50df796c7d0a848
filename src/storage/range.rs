// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Sets of row ids represented as sorted, disjoint half-open ranges.

use std::fmt;

use roaring::RoaringBitmap;

use crate::types::RowId;

/// A half-open row range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range {
    begin: RowId,
    end: RowId,
}

impl Range {
    pub fn new(begin: RowId, end: RowId) -> Self {
        debug_assert!(begin <= end, "invalid range [{begin}, {end})");
        Self { begin, end }
    }

    pub fn begin(&self) -> RowId {
        self.begin
    }

    pub fn end(&self) -> RowId {
        self.end
    }

    pub fn span_size(&self) -> usize {
        (self.end - self.begin) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.begin <= row && row < self.end
    }

    pub fn intersection(&self, other: &Range) -> Range {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        Range::new(begin, end.max(begin))
    }

    pub fn has_intersection(&self, other: &Range) -> bool {
        !self.intersection(other).is_empty()
    }
}

impl From<std::ops::Range<RowId>> for Range {
    fn from(r: std::ops::Range<RowId>) -> Self {
        Range::new(r.start, r.end)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// An ordered set of disjoint, non-adjacent, non-empty ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseRange {
    ranges: Vec<Range>,
}

impl SparseRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_range(begin: RowId, end: RowId) -> Self {
        let mut range = Self::new();
        range.add(Range::new(begin, end));
        range
    }

    /// Convert a row bitmap into ranges of consecutive rows.
    pub fn from_bitmap(bitmap: &RoaringBitmap) -> Self {
        let mut ranges: Vec<Range> = Vec::new();
        for row in bitmap.iter() {
            match ranges.last_mut() {
                Some(last) if last.end == row => last.end += 1,
                _ => ranges.push(Range::new(row, row + 1)),
            }
        }
        Self { ranges }
    }

    /// Insert `r`, merging it with every overlapping or adjacent range.
    pub fn add(&mut self, r: Range) {
        if r.is_empty() {
            return;
        }
        let lo = self.ranges.partition_point(|x| x.end < r.begin);
        let hi = self.ranges.partition_point(|x| x.begin <= r.end);
        let mut merged = r;
        if lo < hi {
            merged.begin = merged.begin.min(self.ranges[lo].begin);
            merged.end = merged.end.max(self.ranges[hi - 1].end);
        }
        self.ranges.splice(lo..hi, [merged]);
    }

    /// Number of disjoint ranges.
    pub fn size(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of rows covered.
    pub fn span_size(&self) -> usize {
        self.ranges.iter().map(Range::span_size).sum()
    }

    pub fn begin(&self) -> RowId {
        self.ranges.first().map_or(0, |r| r.begin)
    }

    pub fn end(&self) -> RowId {
        self.ranges.last().map_or(0, |r| r.end)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Range> {
        self.ranges.iter()
    }

    pub fn get(&self, idx: usize) -> Range {
        self.ranges[idx]
    }

    pub fn contains(&self, row: RowId) -> bool {
        let idx = self.ranges.partition_point(|r| r.end <= row);
        idx < self.ranges.len() && self.ranges[idx].contains(row)
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn intersection(&self, other: &SparseRange) -> SparseRange {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (self.ranges[i], other.ranges[j]);
            let r = a.intersection(&b);
            if !r.is_empty() {
                result.push(r);
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        SparseRange { ranges: result }
    }

    pub fn union(&self, other: &SparseRange) -> SparseRange {
        let mut result = self.clone();
        for r in other.iter() {
            result.add(*r);
        }
        result
    }

    /// Iterate row ids in order.
    pub fn rows(&self) -> impl Iterator<Item = RowId> + '_ {
        self.ranges.iter().flat_map(|r| r.begin..r.end)
    }

    /// A cursor that hands out rows of this range in batches.
    pub fn into_cursor(self) -> SparseRangeCursor {
        let next_row = self.begin();
        SparseRangeCursor {
            range: self,
            index: 0,
            next_row,
        }
    }
}

impl FromIterator<Range> for SparseRange {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        let mut range = SparseRange::new();
        for r in iter {
            range.add(r);
        }
        range
    }
}

impl fmt::Display for SparseRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, ")")
    }
}

/// Consumes a [`SparseRange`] front to back.
#[derive(Debug, Clone)]
pub struct SparseRangeCursor {
    range: SparseRange,
    index: usize,
    next_row: RowId,
}

impl SparseRangeCursor {
    pub fn has_more(&self) -> bool {
        self.index < self.range.size()
    }

    /// Row that the next call will start from.
    pub fn peek_row(&self) -> RowId {
        self.next_row
    }

    /// Take up to `size` rows, possibly spanning several ranges.
    pub fn next_batch(&mut self, size: usize) -> SparseRange {
        let mut batch = SparseRange::new();
        let mut remaining = size;
        while remaining > 0 && self.has_more() {
            let current = self.range.get(self.index);
            let take = ((current.end - self.next_row) as usize).min(remaining);
            let end = self.next_row + take as RowId;
            batch.add(Range::new(self.next_row, end));
            remaining -= take;
            self.advance_to(end);
        }
        batch
    }

    /// Take up to `size` consecutive rows from the current range.
    pub fn next_range(&mut self, size: usize) -> Range {
        if !self.has_more() {
            return Range::default();
        }
        let current = self.range.get(self.index);
        let take = ((current.end - self.next_row) as usize).min(size);
        let r = Range::new(self.next_row, self.next_row + take as RowId);
        self.advance_to(r.end);
        r
    }

    fn advance_to(&mut self, row: RowId) {
        self.next_row = row;
        if row >= self.range.get(self.index).end {
            self.index += 1;
            if self.has_more() {
                self.next_row = self.range.get(self.index).begin;
            }
        }
    }
}
