// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use risinglight_proto::segment::{BitmapIndexPb, PageTypePb};
use roaring::RoaringBitmap;

use super::indexed_column_page;
use crate::array::{Array, ArrayImpl};
use crate::storage::mem_tracker::MemUsage;
use crate::storage::segment::SegmentFile;
use crate::storage::{
    decode_length_prefixed, decode_plain_values, encode_length_prefixed, SparseRange,
    StorageResult, TracedStorageError,
};
use crate::types::{DataType, DataValue, RowId};

/// Sorted distinct values of a column and the rows holding each of them.
///
/// The bitmap of null rows, if any, comes after the bitmaps of all values.
#[derive(Debug)]
pub struct BitmapIndexReader {
    dict: ArrayImpl,
    bitmaps: Vec<Bytes>,
    has_null: bool,
}

impl BitmapIndexReader {
    pub fn load(file: &SegmentFile, meta: &BitmapIndexPb, ty: &DataType) -> StorageResult<Self> {
        let dict_pointer = indexed_column_page(meta.dict_column.as_ref(), "bitmap dictionary")?;
        let num_dict = meta.dict_column.as_ref().map_or(0, |m| m.num_values as usize);
        let page = file.read_index_page(dict_pointer, PageTypePb::DataPage)?;
        let dict = decode_plain_values(&ty.delegate(), &page.body, num_dict, None)?;

        let bitmap_pointer = indexed_column_page(meta.bitmap_column.as_ref(), "bitmap")?;
        let num_bitmaps = meta.bitmap_column.as_ref().map_or(0, |m| m.num_values as usize);
        if num_bitmaps != num_dict + meta.has_null as usize {
            return Err(TracedStorageError::corruption(format!(
                "{}: {num_bitmaps} bitmaps for {num_dict} dictionary values",
                file.name()
            )));
        }
        let page = file.read_index_page(bitmap_pointer, PageTypePb::IndexPage)?;
        let bitmaps = decode_length_prefixed(&page.body, num_bitmaps)?;
        Ok(Self {
            dict,
            bitmaps,
            has_null: meta.has_null,
        })
    }

    pub fn num_dict_values(&self) -> usize {
        self.dict.len()
    }

    pub fn has_null(&self) -> bool {
        self.has_null
    }
}

impl MemUsage for BitmapIndexReader {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.dict.memory_usage()
            + self.bitmaps.iter().map(|b| b.len()).sum::<usize>()
    }
}

/// Cursor over a [`BitmapIndexReader`].
#[derive(Debug, Clone)]
pub struct BitmapIndexIterator {
    reader: Arc<BitmapIndexReader>,
    current: usize,
}

impl BitmapIndexIterator {
    pub fn new(reader: Arc<BitmapIndexReader>) -> Self {
        Self { reader, current: 0 }
    }

    /// Number of bitmaps, including the null bitmap.
    pub fn bitmap_nums(&self) -> usize {
        self.reader.bitmaps.len()
    }

    pub fn num_dict_values(&self) -> usize {
        self.reader.num_dict_values()
    }

    pub fn has_null_bitmap(&self) -> bool {
        self.reader.has_null
    }

    /// Ordinal the last seek landed on.
    pub fn current_ordinal(&self) -> usize {
        self.current
    }

    /// Position at the first dictionary value not less than `value`.
    ///
    /// Returns whether the value was found exactly. Fails with `NotFound` if every
    /// value is smaller.
    pub fn seek_dictionary(&mut self, value: &DataValue) -> StorageResult<bool> {
        let dict = &self.reader.dict;
        let (mut lo, mut hi) = (0, dict.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if dict.value_at(mid) < *value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == dict.len() {
            return Err(TracedStorageError::not_found("bitmap dictionary value", value));
        }
        self.current = lo;
        Ok(dict.value_at(lo) == *value)
    }

    pub fn read_bitmap(&self, ordinal: usize) -> StorageResult<RoaringBitmap> {
        let data = self.reader.bitmaps.get(ordinal).ok_or_else(|| {
            TracedStorageError::invalid_argument(format!(
                "bitmap ordinal {ordinal} out of range {}",
                self.bitmap_nums()
            ))
        })?;
        RoaringBitmap::deserialize_from(&data[..])
            .map_err(|e| TracedStorageError::corruption(format!("invalid bitmap: {e}")))
    }

    /// Rows holding null, empty if the column has none.
    pub fn read_null_bitmap(&self) -> StorageResult<RoaringBitmap> {
        if !self.reader.has_null {
            return Ok(RoaringBitmap::new());
        }
        self.read_bitmap(self.bitmap_nums() - 1)
    }

    /// Union of the bitmaps with ordinals in `[from, to)`.
    pub fn read_union_bitmap(&self, from: usize, to: usize) -> StorageResult<RoaringBitmap> {
        let mut result = RoaringBitmap::new();
        for ordinal in from..to {
            result |= self.read_bitmap(ordinal)?;
        }
        Ok(result)
    }

    /// Union of the bitmaps with ordinals in any range of `ranges`.
    pub fn read_union_bitmap_ranges(&self, ranges: &SparseRange) -> StorageResult<RoaringBitmap> {
        let mut result = RoaringBitmap::new();
        for r in ranges.iter() {
            result |= self.read_union_bitmap(r.begin() as usize, r.end() as usize)?;
        }
        Ok(result)
    }
}

/// Collects the rows of each distinct value.
#[derive(Default)]
pub struct BitmapIndexBuilder {
    values: BTreeMap<DataValue, RoaringBitmap>,
    nulls: RoaringBitmap,
}

impl BitmapIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, row: RowId, value: &DataValue) {
        if value.is_null() {
            self.nulls.insert(row);
        } else {
            self.values.entry(value.clone()).or_default().insert(row);
        }
    }

    /// The dictionary values, the body of the bitmap page, and whether a null bitmap exists.
    pub fn finish(self) -> StorageResult<(Vec<DataValue>, Vec<u8>, usize, bool)> {
        let has_null = !self.nulls.is_empty();
        let (dict, mut bitmaps): (Vec<_>, Vec<_>) = self.values.into_iter().unzip();
        if has_null {
            bitmaps.push(self.nulls);
        }
        let mut body = vec![];
        let mut buf = vec![];
        for bitmap in &bitmaps {
            buf.clear();
            bitmap.serialize_into(&mut buf)?;
            encode_length_prefixed(&buf, &mut body);
        }
        Ok((dict, body, bitmaps.len(), has_null))
    }
}

#[cfg(test)]
mod tests {
    use risinglight_proto::segment::{
        DataPageFooterPb, IndexPageFooterPb, IndexedColumnMetaPb, PageFooterPb,
    };

    use super::*;
    use crate::storage::segment::tests::file_from_bytes;
    use crate::storage::{encode_plain_values, write_page, Range};

    fn build(values: &[DataValue]) -> BitmapIndexIterator {
        let mut builder = BitmapIndexBuilder::new();
        for (row, v) in values.iter().enumerate() {
            builder.add(row as RowId, v);
        }
        let (dict, bitmaps, num_bitmaps, has_null) = builder.finish().unwrap();
        let mut buf = vec![];
        let mut dict_body = vec![];
        encode_plain_values(&ArrayImpl::from_values(&DataType::Int32, &dict), &mut dict_body);
        let dict_page = write_page(
            &mut buf,
            &dict_body,
            PageFooterPb {
                r#type: PageTypePb::DataPage as i32,
                data_page_footer: Some(DataPageFooterPb {
                    first_ordinal: 0,
                    num_values: dict.len() as u64,
                    nullmap_size: 0,
                }),
                ..Default::default()
            },
            None,
        );
        let bitmap_page = write_page(
            &mut buf,
            &bitmaps,
            PageFooterPb {
                r#type: PageTypePb::IndexPage as i32,
                index_page_footer: Some(IndexPageFooterPb {
                    num_entries: num_bitmaps as u32,
                }),
                ..Default::default()
            },
            None,
        );
        let meta = BitmapIndexPb {
            dict_column: Some(IndexedColumnMetaPb {
                num_values: dict.len() as u64,
                page: Some(dict_page.to_pb()),
            }),
            bitmap_column: Some(IndexedColumnMetaPb {
                num_values: num_bitmaps as u64,
                page: Some(bitmap_page.to_pb()),
            }),
            has_null,
        };
        let file = file_from_bytes(buf);
        let reader = BitmapIndexReader::load(&file, &meta, &DataType::Int32).unwrap();
        BitmapIndexIterator::new(Arc::new(reader))
    }

    #[test]
    fn seek_and_read() {
        let values = [5, 1, 5, 9]
            .into_iter()
            .map(DataValue::Int32)
            .chain([DataValue::Null])
            .collect::<Vec<_>>();
        let mut iter = build(&values);
        assert_eq!(iter.num_dict_values(), 3);
        assert_eq!(iter.bitmap_nums(), 4);

        assert!(iter.seek_dictionary(&DataValue::Int32(5)).unwrap());
        assert_eq!(iter.current_ordinal(), 1);
        let rows = iter.read_bitmap(iter.current_ordinal()).unwrap();
        assert_eq!(rows.iter().collect::<Vec<_>>(), vec![0, 2]);

        assert!(!iter.seek_dictionary(&DataValue::Int32(6)).unwrap());
        assert_eq!(iter.current_ordinal(), 2);
        assert!(iter
            .seek_dictionary(&DataValue::Int32(10))
            .unwrap_err()
            .is_not_found());

        assert_eq!(iter.read_null_bitmap().unwrap().iter().collect::<Vec<_>>(), vec![4]);
        let union = iter.read_union_bitmap(0, 2).unwrap();
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        let ranges = SparseRange::from_iter([Range::new(0, 1), Range::new(2, 3)]);
        let union = iter.read_union_bitmap_ranges(&ranges).unwrap();
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn no_null_bitmap() {
        let iter = build(&[DataValue::Int32(1)]);
        assert!(!iter.has_null_bitmap());
        assert!(iter.read_null_bitmap().unwrap().is_empty());
    }
}
