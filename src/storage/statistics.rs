// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters filled in while reading segments.
///
/// One instance is usually shared by every segment iterator of a scan.
#[derive(Debug, Default)]
pub struct ReaderStatistics {
    /// Rows of whole segments skipped by segment-level zone maps.
    pub segment_stats_filtered: AtomicU64,
    /// Rows skipped by page zone maps.
    pub rows_stats_filtered: AtomicU64,
    /// Rows skipped by bloom filters.
    pub rows_bf_filtered: AtomicU64,
    /// Rows skipped by bitmap indexes.
    pub rows_bitmap_index_filtered: AtomicU64,
    /// Rows skipped by short key ranges.
    pub rows_key_range_filtered: AtomicU64,
    /// Rows dropped by row-level predicate evaluation.
    pub rows_vec_cond_filtered: AtomicU64,
    /// Rows dropped by delete predicates.
    pub rows_del_filtered: AtomicU64,
    /// Rows decoded from data pages.
    pub raw_rows_read: AtomicU64,
    pub pages_read: AtomicU64,
    pub cached_pages_read: AtomicU64,
    pub bytes_read: AtomicU64,
}

impl ReaderStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
