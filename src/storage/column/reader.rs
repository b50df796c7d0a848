// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::Arc;

use risinglight_proto::segment::{
    BitmapIndexPb, BloomFilterIndexPb, ColumnIndexTypePb, ColumnMetaPb, CompressionTypePb,
    EncodingTypePb, IndexedColumnMetaPb, OrdinalIndexPb, PageTypePb, ZoneMapPb,
};
use tracing::debug;

use super::{
    data_type_from_meta, ArrayColumnIterator, ColumnIterator, LazyIndex, ScalarColumnIterator,
};
use crate::array::{ArrayImpl, Utf8Array};
use crate::storage::mem_tracker::{message_mem_usage, MemGuard, MemUsage};
use crate::storage::segment::SegmentFile;
use crate::storage::{
    check_encoding, decode_plain_values, get_block_compression_codec, BitmapIndexIterator,
    BitmapIndexReader, BloomFilterIndexReader, ColumnPredicateRef, CompressionCodec,
    OrdinalIndexReader, OrdinalPageIndexIterator, Page, PagePointer, Range, ReaderStatistics,
    SparseRange, StorageResult, TracedStorageError, ZoneMapDetail, ZoneMapIndexReader,
};
use crate::types::{DataType, RowId};

/// Serialized index metadata waiting to be loaded.
pub struct IndexMeta<T>(T);

impl<T: prost::Message> MemUsage for IndexMeta<T> {
    fn mem_usage(&self) -> usize {
        message_mem_usage(&self.0)
    }
}

impl<T> Deref for IndexMeta<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Output of page-level zone map pruning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMapFilterResult {
    /// Pages that may hold rows satisfying every predicate.
    pub pages: Vec<usize>,
    /// Surviving pages whose rows may also match the delete predicate.
    pub del_partial_filtered_pages: Vec<usize>,
    /// Rows of `pages`.
    pub row_ranges: SparseRange,
    /// Rows of `del_partial_filtered_pages`.
    pub del_partial_ranges: SparseRange,
}

struct ScalarIndexes {
    ordinal: LazyIndex<IndexMeta<OrdinalIndexPb>, OrdinalIndexReader>,
    zone_map: Option<LazyIndex<IndexMeta<IndexedColumnMetaPb>, ZoneMapIndexReader>>,
    segment_zone_map: Option<ZoneMapPb>,
    bitmap: Option<LazyIndex<IndexMeta<BitmapIndexPb>, BitmapIndexReader>>,
    bloom_filter: Option<LazyIndex<IndexMeta<BloomFilterIndexPb>, BloomFilterIndexReader>>,
}

enum ColumnKind {
    Scalar(ScalarIndexes),
    Array {
        element: Arc<ColumnReader>,
        nulls: Option<Arc<ColumnReader>>,
        offsets: Arc<ColumnReader>,
    },
}

/// Reader of one column of a segment.
pub struct ColumnReader {
    file: Arc<SegmentFile>,
    unique_id: u32,
    column_type: DataType,
    encoding: EncodingTypePb,
    codec: Option<&'static dyn CompressionCodec>,
    is_nullable: bool,
    dict_page: Option<PagePointer>,
    total_mem_footprint: u64,
    num_rows: u64,
    kind: ColumnKind,
    _mem: MemGuard,
}

impl ColumnReader {
    pub fn create(meta: ColumnMetaPb, file: Arc<SegmentFile>) -> StorageResult<Arc<Self>> {
        let column_type = data_type_from_meta(&meta)?;
        let encoding = EncodingTypePb::try_from(meta.encoding).map_err(|_| {
            TracedStorageError::not_supported(format!("encoding {}", meta.encoding))
        })?;
        let compression = CompressionTypePb::try_from(meta.compression).map_err(|_| {
            TracedStorageError::not_supported(format!("compression {}", meta.compression))
        })?;
        let codec = get_block_compression_codec(compression)?;
        let tracker = file.mem_tracker().clone();

        let kind = if column_type.is_array() {
            let expected = if meta.is_nullable { 3 } else { 2 };
            if meta.children_columns.len() != expected {
                return Err(TracedStorageError::corruption(format!(
                    "{}: array column {} has {} children, expect {expected}",
                    file.name(),
                    meta.unique_id,
                    meta.children_columns.len()
                )));
            }
            let mut children = meta.children_columns.into_iter();
            let mut next_child = || {
                let child = children
                    .next()
                    .ok_or_else(|| TracedStorageError::corruption("array child column missing"))?;
                ColumnReader::create(child, file.clone())
            };
            let element = next_child()?;
            let nulls = if meta.is_nullable {
                Some(next_child()?)
            } else {
                None
            };
            let offsets = next_child()?;
            ColumnKind::Array {
                element,
                nulls,
                offsets,
            }
        } else {
            check_encoding(&column_type, encoding)?;
            let mut ordinal = None;
            let mut zone_map = None;
            let mut segment_zone_map = None;
            let mut bitmap = None;
            let mut bloom_filter = None;
            let missing = |what: &str| {
                TracedStorageError::corruption(format!(
                    "{}: {what} index of column {} without body",
                    file.name(),
                    meta.unique_id
                ))
            };
            for index in meta.indexes {
                match ColumnIndexTypePb::try_from(index.r#type) {
                    Ok(ColumnIndexTypePb::OrdinalIndex) => {
                        let pb = index.ordinal_index.ok_or_else(|| missing("ordinal"))?;
                        ordinal = Some(LazyIndex::new(&tracker, IndexMeta(pb)));
                    }
                    Ok(ColumnIndexTypePb::ZoneMapIndex) => {
                        let pb = index.zone_map_index.ok_or_else(|| missing("zone map"))?;
                        segment_zone_map = pb.segment_zone_map;
                        let pages = pb.page_zone_maps.ok_or_else(|| missing("zone map"))?;
                        zone_map = Some(LazyIndex::new(&tracker, IndexMeta(pages)));
                    }
                    Ok(ColumnIndexTypePb::BitmapIndex) => {
                        let pb = index.bitmap_index.ok_or_else(|| missing("bitmap"))?;
                        bitmap = Some(LazyIndex::new(&tracker, IndexMeta(pb)));
                    }
                    Ok(ColumnIndexTypePb::BloomFilterIndex) => {
                        let pb = index
                            .bloom_filter_index
                            .ok_or_else(|| missing("bloom filter"))?;
                        bloom_filter = Some(LazyIndex::new(&tracker, IndexMeta(pb)));
                    }
                    Ok(ColumnIndexTypePb::UnknownIndexType) | Err(_) => {
                        return Err(TracedStorageError::corruption(format!(
                            "{}: unknown index type {} of column {}",
                            file.name(),
                            index.r#type,
                            meta.unique_id
                        )))
                    }
                }
            }
            let ordinal = ordinal.ok_or_else(|| {
                TracedStorageError::corruption(format!(
                    "{}: missing ordinal index for column {}",
                    file.name(),
                    meta.unique_id
                ))
            })?;
            ColumnKind::Scalar(ScalarIndexes {
                ordinal,
                zone_map,
                segment_zone_map,
                bitmap,
                bloom_filter,
            })
        };

        Ok(Arc::new(Self {
            unique_id: meta.unique_id,
            column_type,
            encoding,
            codec,
            is_nullable: meta.is_nullable,
            dict_page: meta.dict_page.as_ref().map(PagePointer::from),
            total_mem_footprint: meta.total_mem_footprint,
            num_rows: meta.num_rows,
            kind,
            _mem: MemGuard::new(&tracker, std::mem::size_of::<Self>()),
            file,
        }))
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    pub fn column_type(&self) -> &DataType {
        &self.column_type
    }

    pub fn encoding(&self) -> EncodingTypePb {
        self.encoding
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn total_mem_footprint(&self) -> u64 {
        self.total_mem_footprint
    }

    pub fn file(&self) -> &Arc<SegmentFile> {
        &self.file
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ColumnKind::Array { .. })
    }

    pub fn has_zone_map(&self) -> bool {
        matches!(&self.kind, ColumnKind::Scalar(idx) if idx.zone_map.is_some())
    }

    pub fn has_bitmap_index(&self) -> bool {
        matches!(&self.kind, ColumnKind::Scalar(idx) if idx.bitmap.is_some())
    }

    pub fn has_bloom_filter_index(&self) -> bool {
        matches!(&self.kind, ColumnKind::Scalar(idx) if idx.bloom_filter.is_some())
    }

    /// The ordinal index. For array columns this is the index of the offsets column.
    pub fn load_ordinal_index(&self) -> StorageResult<Arc<OrdinalIndexReader>> {
        match &self.kind {
            ColumnKind::Scalar(idx) => idx.ordinal.get_or_load(self.file.mem_tracker(), |meta| {
                debug!(file = self.file.name(), column = self.unique_id, "loading ordinal index");
                OrdinalIndexReader::load(&self.file, meta, self.num_rows)
            }),
            ColumnKind::Array { offsets, .. } => offsets.load_ordinal_index(),
        }
    }

    fn load_zone_map_index(&self) -> StorageResult<Option<Arc<ZoneMapIndexReader>>> {
        let ColumnKind::Scalar(ScalarIndexes {
            zone_map: Some(zone_map),
            ..
        }) = &self.kind
        else {
            return Ok(None);
        };
        let reader = zone_map.get_or_load(self.file.mem_tracker(), |meta| {
            debug!(file = self.file.name(), column = self.unique_id, "loading zone map index");
            ZoneMapIndexReader::load(&self.file, Some(&**meta))
        })?;
        Ok(Some(reader))
    }

    fn load_bitmap_index(&self) -> StorageResult<Option<Arc<BitmapIndexReader>>> {
        let ColumnKind::Scalar(ScalarIndexes {
            bitmap: Some(bitmap),
            ..
        }) = &self.kind
        else {
            return Ok(None);
        };
        let reader = bitmap.get_or_load(self.file.mem_tracker(), |meta| {
            debug!(file = self.file.name(), column = self.unique_id, "loading bitmap index");
            BitmapIndexReader::load(&self.file, meta, &self.column_type)
        })?;
        Ok(Some(reader))
    }

    fn load_bloom_filter_index(&self) -> StorageResult<Option<Arc<BloomFilterIndexReader>>> {
        let ColumnKind::Scalar(ScalarIndexes {
            bloom_filter: Some(bloom_filter),
            ..
        }) = &self.kind
        else {
            return Ok(None);
        };
        let reader = bloom_filter.get_or_load(self.file.mem_tracker(), |meta| {
            debug!(file = self.file.name(), column = self.unique_id, "loading bloom filter index");
            BloomFilterIndexReader::load(&self.file, meta)
        })?;
        Ok(Some(reader))
    }

    pub fn seek_to_first(&self) -> StorageResult<OrdinalPageIndexIterator> {
        let index = self.load_ordinal_index()?;
        if index.num_pages() == 0 {
            return Err(TracedStorageError::not_found(
                "page",
                format!("Failed to seek to first rowid of {}", self.file.name()),
            ));
        }
        Ok(OrdinalPageIndexIterator::new(index, 0))
    }

    /// Position at the page containing `ordinal`.
    pub fn seek_at_or_before(&self, ordinal: RowId) -> StorageResult<OrdinalPageIndexIterator> {
        let index = self.load_ordinal_index()?;
        match index.seek_at_or_before(ordinal) {
            Some(page) => Ok(OrdinalPageIndexIterator::new(index, page)),
            None => Err(TracedStorageError::not_found(
                "page",
                format!("Failed to seek to ordinal {ordinal} in {}", self.file.name()),
            )),
        }
    }

    pub fn read_page(
        &self,
        pointer: PagePointer,
        use_page_cache: bool,
        stats: Option<&ReaderStatistics>,
    ) -> StorageResult<Arc<Page>> {
        self.file.read_page(pointer, self.codec, use_page_cache, stats)
    }

    /// The dictionary of a dictionary-encoded column.
    pub fn read_dictionary(
        &self,
        use_page_cache: bool,
        stats: Option<&ReaderStatistics>,
    ) -> StorageResult<Utf8Array> {
        let pointer = self.dict_page.ok_or_else(|| {
            TracedStorageError::corruption(format!(
                "{}: dictionary encoded column {} without dictionary page",
                self.file.name(),
                self.unique_id
            ))
        })?;
        let page = self.read_page(pointer, use_page_cache, stats)?;
        page.expect_type(PageTypePb::DictionaryPage, self.file.name())?;
        let num_values = page
            .footer
            .dict_page_footer
            .as_ref()
            .map_or(0, |f| f.num_values as usize);
        match decode_plain_values(&self.column_type, &page.body, num_values, None)? {
            ArrayImpl::Utf8(dict) => Ok(dict),
            other => Err(TracedStorageError::corruption(format!(
                "dictionary of type {}",
                other.type_name()
            ))),
        }
    }

    fn all_rows(&self) -> SparseRange {
        SparseRange::from_range(0, self.num_rows as RowId)
    }

    /// Prune pages with the zone maps of this column.
    ///
    /// A page survives if it passes every predicate. Columns without zone maps
    /// keep all their rows.
    pub fn zone_map_filter(
        &self,
        predicates: &[ColumnPredicateRef],
        del_predicate: Option<&ColumnPredicateRef>,
    ) -> StorageResult<ZoneMapFilterResult> {
        let Some(zone_maps) = self.load_zone_map_index()? else {
            let row_ranges = self.all_rows();
            let del_partial_ranges = if del_predicate.is_some() {
                row_ranges.clone()
            } else {
                SparseRange::new()
            };
            return Ok(ZoneMapFilterResult {
                row_ranges,
                del_partial_ranges,
                ..Default::default()
            });
        };
        let ordinals = self.load_ordinal_index()?;
        if zone_maps.num_pages() != ordinals.num_pages() {
            return Err(TracedStorageError::corruption(format!(
                "{}: {} zone maps for {} pages of column {}",
                self.file.name(),
                zone_maps.num_pages(),
                ordinals.num_pages(),
                self.unique_id
            )));
        }

        let mut result = ZoneMapFilterResult::default();
        for (page, pb) in zone_maps.page_zone_maps().iter().enumerate() {
            let detail =
                ZoneMapDetail::parse(&self.column_type, pb, ordinals.num_rows_of_page(page))?;
            if !predicates.iter().all(|p| p.zone_map_filter(&detail)) {
                continue;
            }
            let range = Range::new(ordinals.first_ordinal(page), ordinals.end_ordinal(page));
            result.pages.push(page);
            result.row_ranges.add(range);
            if del_predicate.map_or(false, |p| p.zone_map_filter(&detail)) {
                result.del_partial_filtered_pages.push(page);
                result.del_partial_ranges.add(range);
            }
        }
        debug!(
            file = self.file.name(),
            column = self.unique_id,
            pages = ordinals.num_pages(),
            survived = result.pages.len(),
            "zone map filter"
        );
        Ok(result)
    }

    /// Whether the whole segment may hold rows satisfying every predicate.
    pub fn segment_zone_map_filter(&self, predicates: &[ColumnPredicateRef]) -> StorageResult<bool> {
        let ColumnKind::Scalar(ScalarIndexes {
            segment_zone_map: Some(pb),
            ..
        }) = &self.kind
        else {
            return Ok(true);
        };
        let detail = ZoneMapDetail::parse(&self.column_type, pb, self.num_rows as usize)?;
        Ok(predicates.iter().all(|p| p.zone_map_filter(&detail)))
    }

    /// Remove from `row_ranges` the pages whose bloom filter rejects a predicate.
    ///
    /// The result is always a subset of the input.
    pub fn bloom_filter(
        &self,
        predicates: &[ColumnPredicateRef],
        row_ranges: &mut SparseRange,
    ) -> StorageResult<()> {
        let bloom = self.load_bloom_filter_index()?.ok_or_else(|| {
            TracedStorageError::not_found(
                "bloom filter index",
                format!("column {} of {}", self.unique_id, self.file.name()),
            )
        })?;
        let ordinals = self.load_ordinal_index()?;

        let mut pages = BTreeSet::new();
        for r in row_ranges.iter() {
            let Some(first_page) = ordinals.seek_at_or_before(r.begin()) else {
                continue;
            };
            let mut iter = OrdinalPageIndexIterator::new(ordinals.clone(), first_page);
            while iter.valid() && iter.first_ordinal() < r.end() {
                pages.insert(iter.page_index());
                iter.next();
            }
        }

        let filters = bloom.iter();
        let mut candidates = SparseRange::new();
        for page in pages {
            let filter = filters.read_bloom_filter(page)?;
            let passed = predicates
                .iter()
                .filter(|p| p.support_bloom_filter())
                .all(|p| p.bloom_filter(&filter));
            if passed {
                candidates.add(Range::new(
                    ordinals.first_ordinal(page),
                    ordinals.end_ordinal(page),
                ));
            }
        }
        *row_ranges = row_ranges.intersection(&candidates);
        Ok(())
    }

    /// An iterator over the bitmap index, `None` if the column has none.
    pub fn new_bitmap_index_iterator(&self) -> StorageResult<Option<BitmapIndexIterator>> {
        Ok(self.load_bitmap_index()?.map(BitmapIndexIterator::new))
    }

    pub fn new_iterator(self: &Arc<Self>) -> Box<dyn ColumnIterator> {
        match &self.kind {
            ColumnKind::Scalar(_) => Box::new(ScalarColumnIterator::new(self.clone())),
            ColumnKind::Array {
                element,
                nulls,
                offsets,
            } => Box::new(ArrayColumnIterator::new(
                self.num_rows as RowId,
                element.new_iterator(),
                nulls.as_ref().map(|n| n.new_iterator()),
                offsets.new_iterator(),
            )),
        }
    }
}
