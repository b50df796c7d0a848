// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use risinglight_proto::segment::{FooterPointerPb, PageTypePb};
use tracing::debug;

use super::{
    parse_segment_footer, ChunkIterator, SegmentChunkIteratorAdapter, SegmentFile, SegmentIterator,
};
use crate::array::SchemaRef;
use crate::catalog::TabletSchemaRef;
use crate::storage::mem_tracker::{message_mem_usage, MemGuard};
use crate::storage::{
    BitmapIndexIterator, BlockManager, ColumnIterator, ColumnIteratorOptions, ColumnReader,
    DefaultValueColumnIterator, LazyIndex, PagePointer, ReaderStatistics, SegmentOptions,
    SegmentReadOptions, ShortKeyIndexDecoder, StorageResult, TracedStorageError,
};
use crate::types::{ColumnId, DataType, RowId};

/// An opened segment file.
pub struct Segment {
    file: Arc<SegmentFile>,
    tablet_schema: TabletSchemaRef,
    num_rows: RowId,
    /// Indexed by column id. `None` if the column is not stored in this segment.
    column_readers: Vec<Option<Arc<ColumnReader>>>,
    /// Stored type of every column, kept only if some differs from the tablet schema.
    column_storage_types: Option<Vec<DataType>>,
    short_key_index: Option<LazyIndex<PagePointer, ShortKeyIndexDecoder>>,
    _mem: MemGuard,
}

impl Segment {
    /// Open a segment and read its footer.
    ///
    /// `footer_length_hint` is raised when the footer is longer than it.
    pub fn open(
        block_manager: &dyn BlockManager,
        file_name: &str,
        segment_id: u32,
        tablet_schema: TabletSchemaRef,
        options: &SegmentOptions,
        footer_length_hint: Option<&mut usize>,
        partial_footer: Option<&FooterPointerPb>,
    ) -> StorageResult<Arc<Self>> {
        let block = block_manager.open_block(file_name)?;
        let footer = parse_segment_footer(&*block, footer_length_hint, partial_footer)?;
        let footer_mem = message_mem_usage(&footer);

        let file = Arc::new(
            SegmentFile::new(
                file_name,
                segment_id,
                block,
                options.page_cache.clone(),
                options.mem_tracker.clone(),
            )
            .with_page_cache_for_index(options.use_page_cache_for_index)
            .with_verify_checksum(options.verify_checksum),
        );

        let mut footer_columns: HashMap<u32, _> = footer
            .columns
            .into_iter()
            .map(|meta| (meta.unique_id, meta))
            .collect();
        let mut column_readers = Vec::with_capacity(tablet_schema.num_columns());
        for column in tablet_schema.columns() {
            let reader = match footer_columns.remove(&column.unique_id()) {
                Some(meta) => Some(ColumnReader::create(meta, file.clone())?),
                None => None,
            };
            column_readers.push(reader);
        }

        let storage_types: Vec<DataType> = tablet_schema
            .columns()
            .iter()
            .zip(&column_readers)
            .map(|(column, reader)| match reader {
                Some(reader) => reader.column_type().clone(),
                None => column.data_type().clone(),
            })
            .collect();
        let needs_adapter = storage_types
            .iter()
            .zip(tablet_schema.columns())
            .any(|(stored, column)| stored != column.data_type());

        let short_key_index = footer
            .short_key_index_page
            .as_ref()
            .map(|pb| LazyIndex::new(&options.mem_tracker, PagePointer::from(pb)));

        debug!(
            file = file_name,
            segment_id,
            columns = column_readers.iter().flatten().count(),
            num_rows = footer.num_rows,
            needs_adapter,
            "segment opened"
        );
        Ok(Arc::new(Self {
            _mem: MemGuard::new(
                &options.mem_tracker,
                std::mem::size_of::<Self>() + footer_mem,
            ),
            file,
            tablet_schema,
            num_rows: footer.num_rows,
            column_readers,
            column_storage_types: needs_adapter.then_some(storage_types),
            short_key_index,
        }))
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn id(&self) -> u32 {
        self.file.segment_id()
    }

    pub fn num_rows(&self) -> RowId {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.column_readers.len()
    }

    pub fn tablet_schema(&self) -> &TabletSchemaRef {
        &self.tablet_schema
    }

    /// The reader of column `cid`, `None` if the segment does not store it.
    pub fn column(&self, cid: ColumnId) -> Option<&Arc<ColumnReader>> {
        self.column_readers.get(cid as usize)?.as_ref()
    }

    /// Stored column types, if the segment needs type conversion when read.
    pub fn column_storage_types(&self) -> Option<&[DataType]> {
        self.column_storage_types.as_deref()
    }

    /// Build an iterator producing chunks of `schema`.
    ///
    /// Returns an `EndOfFile` error if the segment zone maps prove that no row
    /// satisfies the predicates.
    pub fn new_iterator(
        self: &Arc<Self>,
        schema: &SchemaRef,
        read_options: &SegmentReadOptions,
    ) -> StorageResult<Box<dyn ChunkIterator>> {
        if read_options.stats.is_none() {
            return Err(TracedStorageError::invalid_argument("stats is null pointer"));
        }
        read_options.check_predicates(schema)?;
        match &self.column_storage_types {
            Some(storage_types) => {
                let mut adapter = SegmentChunkIteratorAdapter::prepare(
                    storage_types,
                    schema.clone(),
                    read_options,
                )?;
                let iter = self.new_iterator_inner(adapter.in_schema(), adapter.in_read_options())?;
                adapter.set_iterator(iter);
                Ok(Box::new(adapter))
            }
            None => self.new_iterator_inner(schema, read_options),
        }
    }

    fn new_iterator_inner(
        self: &Arc<Self>,
        schema: &SchemaRef,
        read_options: &SegmentReadOptions,
    ) -> StorageResult<Box<dyn ChunkIterator>> {
        for (&cid, predicates) in &read_options.predicates {
            let Some(reader) = self.column(cid) else {
                continue;
            };
            if !reader.has_zone_map() || reader.segment_zone_map_filter(predicates)? {
                continue;
            }
            if let Some(stats) = &read_options.stats {
                ReaderStatistics::add(&stats.segment_stats_filtered, reader.num_rows());
            }
            return Err(TracedStorageError::end_of_file(format!(
                "End of file {}, empty iterator",
                self.name()
            )));
        }
        Ok(Box::new(SegmentIterator::new(
            self.clone(),
            schema.clone(),
            read_options.clone(),
        )?))
    }

    /// An iterator over column `cid`. Columns missing from the segment yield
    /// their default value.
    pub fn new_column_iterator(&self, cid: ColumnId) -> StorageResult<Box<dyn ColumnIterator>> {
        if let Some(reader) = self.column(cid) {
            return Ok(reader.new_iterator());
        }
        let column = self.tablet_schema.columns().get(cid as usize).ok_or_else(|| {
            TracedStorageError::invalid_argument(format!(
                "column {cid} out of range, tablet has {} columns",
                self.tablet_schema.num_columns()
            ))
        })?;
        if !column.has_default_value() && !column.is_nullable() {
            return Err(TracedStorageError::internal(format!(
                "invalid nonexistent column({}) without default value.",
                column.name()
            )));
        }
        let mut iter = DefaultValueColumnIterator::new(
            column.name(),
            column.data_type().clone(),
            column.is_nullable(),
            column.default_value().map(String::from),
            self.num_rows,
        );
        iter.init(ColumnIteratorOptions::default())?;
        Ok(Box::new(iter))
    }

    /// Bitmap index of column `cid`, `None` if there is none.
    pub fn new_bitmap_index_iterator(
        &self,
        cid: ColumnId,
    ) -> StorageResult<Option<BitmapIndexIterator>> {
        match self.column(cid) {
            Some(reader) if reader.has_bitmap_index() => reader.new_bitmap_index_iterator(),
            _ => Ok(None),
        }
    }

    /// Load the short key index. Every caller shares one load.
    pub fn load_index(&self) -> StorageResult<Arc<ShortKeyIndexDecoder>> {
        let index = self.short_key_index.as_ref().ok_or_else(|| {
            TracedStorageError::not_found("short key index", self.name())
        })?;
        index.get_or_load(self.file.mem_tracker(), |pointer| {
            debug!(file = self.name(), "loading short key index");
            let page = self
                .file
                .read_index_page(*pointer, PageTypePb::ShortKeyPage)?;
            ShortKeyIndexDecoder::parse(&page)
        })
    }
}
