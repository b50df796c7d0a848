// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use tracing::debug;

use super::Segment;
use crate::array::{Array, ArrayImpl, Chunk, SchemaRef};
use crate::storage::{
    ColumnIterator, ColumnIteratorOptions, ReaderStatistics, SegmentReadOptions, SparseRange,
    SparseRangeCursor, StorageResult, TracedStorageError,
};
use crate::types::{ColumnId, RowId};

/// Produces chunks of a fixed schema.
pub trait ChunkIterator: Send {
    fn schema(&self) -> &SchemaRef;

    /// The next non-empty chunk, `None` at the end.
    fn next_batch(&mut self) -> StorageResult<Option<Chunk>>;
}

/// Reads the rows of a segment that survive index pruning and predicates.
///
/// Pruning runs on the first call to `next_batch`, in this order: requested
/// ranges, short key ranges, page zone maps, bloom filters, bitmap indexes.
pub struct SegmentIterator {
    segment: Arc<Segment>,
    schema: SchemaRef,
    opts: SegmentReadOptions,
    stats: Arc<ReaderStatistics>,
    column_iterators: Vec<Box<dyn ColumnIterator>>,
    /// `None` until pruning is done.
    cursor: Option<SparseRangeCursor>,
    /// Rows that delete predicates may match.
    del_partial_ranges: SparseRange,
}

impl SegmentIterator {
    pub fn new(
        segment: Arc<Segment>,
        schema: SchemaRef,
        opts: SegmentReadOptions,
    ) -> StorageResult<Self> {
        let stats = opts
            .stats
            .clone()
            .ok_or_else(|| TracedStorageError::invalid_argument("stats is null pointer"))?;
        opts.check_predicates(&schema)?;
        if opts.chunk_size == 0 {
            return Err(TracedStorageError::invalid_argument("chunk size is 0"));
        }
        Ok(Self {
            segment,
            schema,
            opts,
            stats,
            column_iterators: vec![],
            cursor: None,
            del_partial_ranges: SparseRange::new(),
        })
    }

    fn column_iterator(&self, cid: ColumnId) -> StorageResult<Box<dyn ColumnIterator>> {
        let mut iter = self.segment.new_column_iterator(cid)?;
        iter.init(self.iterator_options())?;
        Ok(iter)
    }

    fn iterator_options(&self) -> ColumnIteratorOptions {
        ColumnIteratorOptions {
            use_page_cache: self.opts.use_page_cache,
            stats: Some(self.stats.clone()),
        }
    }

    fn init(&mut self) -> StorageResult<()> {
        let num_rows = self.segment.num_rows();
        let mut ranges = SparseRange::from_range(0, num_rows);
        if let Some(requested) = &self.opts.ranges {
            ranges = ranges.intersection(requested);
        }
        self.apply_short_key_ranges(&mut ranges)?;
        self.apply_zone_maps(&mut ranges)?;
        self.apply_bloom_filters(&mut ranges)?;
        self.apply_bitmap_indexes(&mut ranges)?;
        debug!(
            segment = self.segment.name(),
            num_rows,
            rows = ranges.span_size(),
            ranges = ranges.size(),
            "segment pruned"
        );

        self.column_iterators = self
            .schema
            .fields()
            .iter()
            .map(|field| self.column_iterator(field.id()))
            .collect::<StorageResult<_>>()?;
        self.cursor = Some(ranges.into_cursor());
        Ok(())
    }

    fn apply_short_key_ranges(&self, ranges: &mut SparseRange) -> StorageResult<()> {
        if self.opts.short_key_ranges.is_empty() {
            return Ok(());
        }
        let decoder = self.segment.load_index()?;
        let key_ranges: SparseRange = self
            .opts
            .short_key_ranges
            .iter()
            .map(|r| decoder.row_range(r.lower.as_deref(), r.upper.as_deref()))
            .collect();
        self.narrow(ranges, &key_ranges, &self.stats.rows_key_range_filtered);
        Ok(())
    }

    fn apply_zone_maps(&mut self, ranges: &mut SparseRange) -> StorageResult<()> {
        let mut cids: Vec<ColumnId> = self
            .opts
            .predicates
            .keys()
            .chain(self.opts.delete_predicates.keys())
            .copied()
            .collect();
        cids.sort_unstable();
        cids.dedup();

        let mut zone_ranges = ranges.clone();
        let mut del_partial: Option<SparseRange> = None;
        for cid in cids {
            let iter = self.segment.new_column_iterator(cid)?;
            let predicates = self.opts.predicates.get(&cid).map_or(&[][..], Vec::as_slice);
            let del_predicate = self.opts.delete_predicates.get(&cid);
            let result = iter.get_row_ranges_by_zone_map(predicates, del_predicate)?;
            zone_ranges = zone_ranges.intersection(&result.row_ranges);
            if del_predicate.is_some() {
                del_partial = Some(match del_partial {
                    Some(partial) => partial.intersection(&result.del_partial_ranges),
                    None => result.del_partial_ranges,
                });
            }
        }
        self.narrow(ranges, &zone_ranges, &self.stats.rows_stats_filtered);
        self.del_partial_ranges = del_partial.unwrap_or_default();
        Ok(())
    }

    fn apply_bloom_filters(&self, ranges: &mut SparseRange) -> StorageResult<()> {
        for (&cid, predicates) in &self.opts.predicates {
            let has_index = self
                .segment
                .column(cid)
                .map_or(false, |r| r.has_bloom_filter_index());
            if !has_index || !predicates.iter().any(|p| p.support_bloom_filter()) {
                continue;
            }
            let before = ranges.span_size();
            self.segment
                .new_column_iterator(cid)?
                .get_row_ranges_by_bloom_filter(predicates, ranges)?;
            ReaderStatistics::add(
                &self.stats.rows_bf_filtered,
                (before - ranges.span_size()) as u64,
            );
        }
        Ok(())
    }

    fn apply_bitmap_indexes(&self, ranges: &mut SparseRange) -> StorageResult<()> {
        if !self.opts.use_bitmap_index {
            return Ok(());
        }
        for (&cid, predicates) in &self.opts.predicates {
            for predicate in predicates {
                let Some(mut iter) = self.segment.new_bitmap_index_iterator(cid)? else {
                    break;
                };
                let Some(ordinals) = predicate.bitmap_ordinals(&mut iter)? else {
                    continue;
                };
                let rows = SparseRange::from_bitmap(&iter.read_union_bitmap_ranges(&ordinals)?);
                self.narrow(ranges, &rows, &self.stats.rows_bitmap_index_filtered);
            }
        }
        Ok(())
    }

    /// Intersect `ranges` with `with`, counting the rows removed.
    fn narrow(
        &self,
        ranges: &mut SparseRange,
        with: &SparseRange,
        counter: &std::sync::atomic::AtomicU64,
    ) {
        let before = ranges.span_size();
        *ranges = ranges.intersection(with);
        ReaderStatistics::add(counter, (before - ranges.span_size()) as u64);
    }

    /// Clear the selection of rows matching every delete predicate.
    fn filter_deleted(
        &self,
        batch: &SparseRange,
        columns: &[ArrayImpl],
        selection: &mut [bool],
    ) -> usize {
        if self.opts.delete_predicates.is_empty() {
            return 0;
        }
        let predicates: Vec<_> = self
            .opts
            .delete_predicates
            .iter()
            .filter_map(|(cid, p)| Some((self.schema.index_of(*cid)?, p)))
            .collect();
        let mut deleted = 0;
        for (i, row) in batch.rows().enumerate() {
            if !selection[i] || !self.del_partial_ranges.contains(row) {
                continue;
            }
            if predicates
                .iter()
                .all(|(idx, p)| p.evaluate(&columns[*idx].value_at(i)))
            {
                selection[i] = false;
                deleted += 1;
            }
        }
        deleted
    }

    fn read_batch(&mut self, batch: &SparseRange) -> StorageResult<Chunk> {
        let num_rows = batch.span_size();
        let mut columns = Vec::with_capacity(self.column_iterators.len());
        for (field, iter) in self.schema.fields().iter().zip(&mut self.column_iterators) {
            let mut column = ArrayImpl::new_for(field.data_type(), num_rows);
            iter.next_batch_range(batch, &mut column)?;
            columns.push(column);
        }

        let mut selection = vec![true; num_rows];
        for (cid, predicates) in &self.opts.predicates {
            if let Some(idx) = self.schema.index_of(*cid) {
                for predicate in predicates {
                    predicate.evaluate_and(&columns[idx], &mut selection);
                }
            }
        }
        let selected = selection.iter().filter(|s| **s).count();
        ReaderStatistics::add(
            &self.stats.rows_vec_cond_filtered,
            (num_rows - selected) as u64,
        );
        let deleted = self.filter_deleted(batch, &columns, &mut selection);
        ReaderStatistics::add(&self.stats.rows_del_filtered, deleted as u64);

        let mut chunk = Chunk::with_schema(columns, self.schema.clone());
        if selected - deleted < num_rows {
            chunk.filter(&selection);
        }
        Ok(chunk)
    }
}

impl ChunkIterator for SegmentIterator {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn next_batch(&mut self) -> StorageResult<Option<Chunk>> {
        if self.cursor.is_none() {
            self.init()?;
        }
        loop {
            let Some(cursor) = self.cursor.as_mut().filter(|c| c.has_more()) else {
                return Ok(None);
            };
            let batch = cursor.next_batch(self.opts.chunk_size);
            let chunk = self.read_batch(&batch)?;
            if chunk.num_rows() > 0 {
                return Ok(Some(chunk));
            }
        }
    }
}

impl Drop for SegmentIterator {
    fn drop(&mut self) {
        let next_row: Option<RowId> = self.cursor.as_ref().map(SparseRangeCursor::peek_row);
        debug!(segment = self.segment.name(), ?next_row, "segment iterator dropped");
    }
}
