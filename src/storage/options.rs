// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use super::{
    ColumnPredicateRef, MemTracker, PageCache, ReaderStatistics, SparseRange, StorageResult,
    TracedStorageError,
};
use crate::array::Schema;
use crate::types::ColumnId;

/// Options for opening segments.
#[derive(Clone)]
pub struct SegmentOptions {
    /// Tracker charged with the metadata and indexes of opened segments
    pub mem_tracker: Arc<MemTracker>,

    /// Cache of decoded pages shared by all segments, if any
    pub page_cache: Option<Arc<PageCache>>,

    /// Whether index pages go through the page cache
    pub use_page_cache_for_index: bool,

    /// Whether page checksums are verified on read
    pub verify_checksum: bool,
}

impl SegmentOptions {
    /// Options with a page cache of `page_cache_capacity` bytes.
    pub fn with_page_cache_capacity(page_cache_capacity: u64) -> Self {
        Self {
            page_cache: Some(Arc::new(PageCache::new(page_cache_capacity))),
            ..Default::default()
        }
    }

    pub fn default_for_test() -> Self {
        Self {
            mem_tracker: MemTracker::new("test"),
            page_cache: None,
            use_page_cache_for_index: false,
            verify_checksum: true,
        }
    }
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            mem_tracker: MemTracker::new("segment"),
            page_cache: Some(Arc::new(PageCache::new(64 << 20))), // 64MB
            use_page_cache_for_index: true,
            verify_checksum: true,
        }
    }
}

/// Memcomparable bounds of a short key scan, both inclusive. `None` is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortKeyRange {
    pub lower: Option<Bytes>,
    pub upper: Option<Bytes>,
}

/// Options for one scan of a segment.
#[derive(Debug, Clone)]
pub struct SegmentReadOptions {
    /// Rows to read. `None` reads the whole segment.
    pub ranges: Option<SparseRange>,

    /// Key ranges resolved through the short key index. Empty means unbounded.
    pub short_key_ranges: Vec<ShortKeyRange>,

    /// Predicates a row must satisfy, all of them.
    pub predicates: HashMap<ColumnId, Vec<ColumnPredicateRef>>,

    /// A row is deleted if it satisfies all of these.
    pub delete_predicates: HashMap<ColumnId, ColumnPredicateRef>,

    pub use_page_cache: bool,

    /// Whether to prune with bitmap indexes
    pub use_bitmap_index: bool,

    /// Maximum rows of a returned chunk
    pub chunk_size: usize,

    /// Counters of this scan. Required.
    pub stats: Option<Arc<ReaderStatistics>>,
}

impl Default for SegmentReadOptions {
    fn default() -> Self {
        Self {
            ranges: None,
            short_key_ranges: vec![],
            predicates: HashMap::new(),
            delete_predicates: HashMap::new(),
            use_page_cache: true,
            use_bitmap_index: true,
            chunk_size: 4096,
            stats: Some(Arc::new(ReaderStatistics::new())),
        }
    }
}

impl SegmentReadOptions {
    /// Check that every predicate refers to a column of `schema` and holds
    /// values of that column's type.
    pub fn check_predicates(&self, schema: &Schema) -> StorageResult<()> {
        let predicates = self
            .predicates
            .iter()
            .flat_map(|(&cid, preds)| preds.iter().map(move |pred| (cid, pred)))
            .chain(self.delete_predicates.iter().map(|(&cid, pred)| (cid, pred)));
        for (cid, pred) in predicates {
            let idx = schema.index_of(cid).ok_or_else(|| {
                TracedStorageError::invalid_argument(format!(
                    "predicate on column {cid} outside the read schema"
                ))
            })?;
            pred.check_type(schema.field(idx).data_type())?;
        }
        Ok(())
    }
}
