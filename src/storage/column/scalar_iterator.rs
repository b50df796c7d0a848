// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use risinglight_proto::segment::{EncodingTypePb, PageTypePb};

use super::{ColumnIterator, ColumnIteratorOptions, ColumnReader, ZoneMapFilterResult};
use crate::array::{Array, ArrayImpl, Utf8Array};
use crate::storage::{
    decode_data_page, ColumnPredicateRef, OrdinalIndexReader, ReaderStatistics, SparseRange,
    StorageResult, TracedStorageError,
};
use crate::types::RowId;

/// `ScalarColumnIterator` Statistics
#[derive(Debug, Default)]
struct Statistics {
    /// `next_batch` call times
    next_batch_count: u32,

    /// data pages decoded
    fetched_page_count: u32,
}

/// A data page decoded into an array.
struct DecodedPage {
    page_id: usize,
    first_ordinal: RowId,
    values: ArrayImpl,
}

impl DecodedPage {
    fn contains(&self, ordinal: RowId) -> bool {
        ordinal >= self.first_ordinal && ((ordinal - self.first_ordinal) as usize) < self.values.len()
    }
}

/// Iterates a column of a non-nested type page by page.
pub struct ScalarColumnIterator {
    reader: Arc<ColumnReader>,
    opts: ColumnIteratorOptions,
    ordinals: Option<Arc<OrdinalIndexReader>>,
    dict: Option<Utf8Array>,
    page: Option<DecodedPage>,
    current_ordinal: RowId,
    statistics: Statistics,
}

impl ScalarColumnIterator {
    pub fn new(reader: Arc<ColumnReader>) -> Self {
        Self {
            reader,
            opts: ColumnIteratorOptions::default(),
            ordinals: None,
            dict: None,
            page: None,
            current_ordinal: 0,
            statistics: Statistics::default(),
        }
    }

    fn ordinals(&self) -> StorageResult<Arc<OrdinalIndexReader>> {
        self.ordinals.clone().ok_or_else(|| {
            TracedStorageError::internal(format!(
                "iterator of column {} used before init",
                self.reader.unique_id()
            ))
        })
    }

    fn load_page(&mut self, ordinals: &OrdinalIndexReader, page_id: usize) -> StorageResult<()> {
        let stats = self.opts.stats.as_deref();
        let page = self
            .reader
            .read_page(ordinals.page(page_id), self.opts.use_page_cache, stats)?;
        page.expect_type(PageTypePb::DataPage, self.reader.file().name())?;
        let footer = page.footer.data_page_footer.as_ref().ok_or_else(|| {
            TracedStorageError::corruption(format!(
                "{}: data page {page_id} without footer",
                self.reader.file().name()
            ))
        })?;
        let first_ordinal = ordinals.first_ordinal(page_id);
        if footer.first_ordinal != first_ordinal as u64
            || footer.num_values as usize != ordinals.num_rows_of_page(page_id)
        {
            return Err(TracedStorageError::corruption(format!(
                "{}: data page {page_id} holds rows [{}, +{}), ordinal index says [{first_ordinal}, +{})",
                self.reader.file().name(),
                footer.first_ordinal,
                footer.num_values,
                ordinals.num_rows_of_page(page_id)
            )));
        }
        let values = decode_data_page(
            self.reader.column_type(),
            self.reader.encoding(),
            &page.body,
            footer,
            self.dict.as_ref(),
        )?;
        self.statistics.fetched_page_count += 1;
        self.page = Some(DecodedPage {
            page_id,
            first_ordinal,
            values,
        });
        Ok(())
    }
}

impl ColumnIterator for ScalarColumnIterator {
    fn init(&mut self, opts: ColumnIteratorOptions) -> StorageResult<()> {
        self.ordinals = Some(self.reader.load_ordinal_index()?);
        if self.reader.encoding() == EncodingTypePb::DictEncoding {
            self.dict = Some(
                self.reader
                    .read_dictionary(opts.use_page_cache, opts.stats.as_deref())?,
            );
        }
        self.opts = opts;
        Ok(())
    }

    fn seek_to_first(&mut self) -> StorageResult<()> {
        self.seek_to_ordinal(0)
    }

    fn seek_to_ordinal(&mut self, ordinal: RowId) -> StorageResult<()> {
        let num_rows = self.ordinals()?.num_rows();
        if ordinal > num_rows {
            return Err(TracedStorageError::not_found(
                "row",
                format!(
                    "{ordinal} of column {} with {num_rows} rows",
                    self.reader.unique_id()
                ),
            ));
        }
        self.current_ordinal = ordinal;
        Ok(())
    }

    fn current_ordinal(&self) -> RowId {
        self.current_ordinal
    }

    fn next_batch(&mut self, size: usize, dst: &mut ArrayImpl) -> StorageResult<usize> {
        self.statistics.next_batch_count += 1;
        let ordinals = self.ordinals()?;
        let mut read = 0;
        while read < size && self.current_ordinal < ordinals.num_rows() {
            let cached = matches!(&self.page, Some(page) if page.contains(self.current_ordinal));
            if !cached {
                let page_id = ordinals
                    .seek_at_or_before(self.current_ordinal)
                    .ok_or_else(|| TracedStorageError::not_found("row", self.current_ordinal))?;
                self.load_page(&ordinals, page_id)?;
            }
            let page = self
                .page
                .as_ref()
                .ok_or_else(|| TracedStorageError::internal("no data page loaded"))?;
            let offset = (self.current_ordinal - page.first_ordinal) as usize;
            let count = (size - read).min(page.values.len() - offset);
            dst.append(&page.values, offset, count);
            read += count;
            self.current_ordinal += count as RowId;
        }
        if let Some(stats) = &self.opts.stats {
            ReaderStatistics::add(&stats.raw_rows_read, read as u64);
        }
        Ok(read)
    }

    fn get_row_ranges_by_zone_map(
        &self,
        predicates: &[ColumnPredicateRef],
        del_predicate: Option<&ColumnPredicateRef>,
    ) -> StorageResult<ZoneMapFilterResult> {
        self.reader.zone_map_filter(predicates, del_predicate)
    }

    fn get_row_ranges_by_bloom_filter(
        &self,
        predicates: &[ColumnPredicateRef],
        row_ranges: &mut SparseRange,
    ) -> StorageResult<()> {
        self.reader.bloom_filter(predicates, row_ranges)
    }
}

impl Drop for ScalarColumnIterator {
    fn drop(&mut self) {
        tracing::debug!(
            "column {}: {:#?}, last_page:{:?}",
            self.reader.unique_id(),
            self.statistics,
            self.page.as_ref().map(|p| p.page_id)
        );
    }
}
