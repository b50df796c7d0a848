// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Writer of segment files, used to build fixtures for tests.

use std::collections::HashMap;

use bytes::BufMut;
use risinglight_proto::segment::*;

use crate::array::ArrayImpl;
use crate::storage::{
    build_zone_map, encode_bloom_filters, encode_null_map, encode_ordinal_index,
    encode_plain_values, encode_short_key, encode_short_key_page, encode_zone_maps,
    field_type_of, get_block_compression_codec, serialize_segment_footer, write_page,
    BitmapIndexBuilder, BloomFilterBuilder, CompressionCodec, PagePointer, StorageResult,
    TracedStorageError,
};
use crate::types::{DataType, DataValue, RowId};

/// How a column is written.
#[derive(Debug, Clone)]
pub struct ColumnWriteOptions {
    pub rows_per_page: usize,
    pub encoding: EncodingTypePb,
    pub compression: CompressionTypePb,
    pub zone_map: bool,
    pub bitmap_index: bool,
    pub bloom_filter: bool,
    /// False positive rate of the bloom filters
    pub bloom_filter_fpp: f64,
}

impl Default for ColumnWriteOptions {
    fn default() -> Self {
        Self {
            rows_per_page: 1024,
            encoding: EncodingTypePb::PlainEncoding,
            compression: CompressionTypePb::NoCompression,
            zone_map: true,
            bitmap_index: false,
            bloom_filter: false,
            bloom_filter_fpp: 0.05,
        }
    }
}

/// Builds a segment file in memory.
///
/// ```ignore
/// let mut builder = SegmentFileBuilder::new();
/// builder.add_column(0, &DataType::Int32, false, &values, &ColumnWriteOptions::default())?;
/// let data = builder.finish();
/// ```
#[derive(Default)]
pub struct SegmentFileBuilder {
    buf: Vec<u8>,
    columns: Vec<ColumnMetaPb>,
    num_rows: Option<usize>,
    short_key_index_page: Option<PagePointerPb>,
    index_footprint: u64,
    data_footprint: u64,
}

impl SegmentFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a column with unique id `unique_id`. Columns get ids in the order
    /// they are added.
    pub fn add_column(
        &mut self,
        unique_id: u32,
        ty: &DataType,
        nullable: bool,
        values: &[DataValue],
        opts: &ColumnWriteOptions,
    ) -> StorageResult<&mut Self> {
        match self.num_rows {
            Some(n) if n != values.len() => {
                return Err(TracedStorageError::invalid_argument(format!(
                    "column {unique_id} has {} rows, segment has {n}",
                    values.len()
                )))
            }
            _ => self.num_rows = Some(values.len()),
        }
        let column_id = self.columns.len() as u32;
        let meta = self.write_column(column_id, unique_id, ty, nullable, values, opts)?;
        self.columns.push(meta);
        Ok(self)
    }

    /// Write the short key index over the key columns, one entry per block of
    /// `num_rows_per_block` rows.
    pub fn add_short_key_index(
        &mut self,
        num_rows_per_block: u32,
        key_columns: &[&[DataValue]],
    ) -> StorageResult<&mut Self> {
        if num_rows_per_block == 0 {
            return Err(TracedStorageError::invalid_argument("0 rows per block"));
        }
        let num_rows = key_columns.first().map_or(0, |c| c.len());
        let keys: Vec<Vec<u8>> = (0..num_rows)
            .step_by(num_rows_per_block as usize)
            .map(|row| {
                let prefix: Vec<DataValue> = key_columns.iter().map(|c| c[row].clone()).collect();
                let mut key = vec![];
                encode_short_key(&prefix, &mut key);
                key
            })
            .collect();
        let (body, key_bytes) = encode_short_key_page(&keys);
        let footer = PageFooterPb {
            r#type: PageTypePb::ShortKeyPage as i32,
            short_key_page_footer: Some(ShortKeyFooterPb {
                num_items: keys.len() as u32,
                key_bytes,
                offset_bytes: keys.len() as u32 * 4,
                segment_id: 0,
                num_rows_per_block,
                num_segment_rows: num_rows as u32,
            }),
            ..Default::default()
        };
        let pointer = self.index_page(&body, footer);
        self.short_key_index_page = Some(pointer.to_pb());
        Ok(self)
    }

    /// The complete file.
    pub fn finish(self) -> Vec<u8> {
        let Self {
            mut buf,
            columns,
            num_rows,
            short_key_index_page,
            index_footprint,
            data_footprint,
        } = self;
        let footer = SegmentFooterPb {
            version: 1,
            num_rows: num_rows.unwrap_or(0) as u32,
            raw_data_footprint: columns.iter().map(|c| c.total_mem_footprint).sum(),
            columns,
            index_footprint,
            data_footprint,
            short_key_index_page,
        };
        serialize_segment_footer(&footer, &mut buf);
        buf
    }

    fn index_page(&mut self, body: &[u8], footer: PageFooterPb) -> PagePointer {
        let pointer = write_page(&mut self.buf, body, footer, None);
        self.index_footprint += pointer.size as u64;
        pointer
    }

    fn indexed_page(&mut self, body: &[u8], num_values: usize) -> IndexedColumnMetaPb {
        let footer = PageFooterPb {
            r#type: PageTypePb::IndexPage as i32,
            index_page_footer: Some(IndexPageFooterPb {
                num_entries: num_values as u32,
            }),
            ..Default::default()
        };
        IndexedColumnMetaPb {
            num_values: num_values as u64,
            page: Some(self.index_page(body, footer).to_pb()),
        }
    }

    fn write_column(
        &mut self,
        column_id: u32,
        unique_id: u32,
        ty: &DataType,
        nullable: bool,
        values: &[DataValue],
        opts: &ColumnWriteOptions,
    ) -> StorageResult<ColumnMetaPb> {
        let (precision, scale) = match ty {
            DataType::Decimal32(p, s) | DataType::Decimal64(p, s) | DataType::Decimal128(p, s) => {
                (*p as i32, *s as i32)
            }
            _ => (0, 0),
        };
        let length = match ty {
            DataType::Char(len) | DataType::Varchar(len) => *len as i32,
            other => other.fixed_width().unwrap_or_default() as i32,
        };
        let mut meta = ColumnMetaPb {
            column_id,
            unique_id,
            r#type: field_type_of(ty) as i32,
            length,
            encoding: opts.encoding as i32,
            compression: opts.compression as i32,
            is_nullable: nullable,
            num_rows: values.len() as u64,
            precision,
            scale,
            ..Default::default()
        };
        match ty.element_type() {
            Some(element) => self.write_array_children(&mut meta, element, nullable, values, opts)?,
            None => self.write_scalar(&mut meta, ty, values, opts)?,
        }
        Ok(meta)
    }

    /// An array is stored as its flattened elements, its null flags if nullable,
    /// and the cumulative end offset of every row.
    fn write_array_children(
        &mut self,
        meta: &mut ColumnMetaPb,
        element: &DataType,
        nullable: bool,
        values: &[DataValue],
        opts: &ColumnWriteOptions,
    ) -> StorageResult<()> {
        let mut elements = vec![];
        let mut nulls = Vec::with_capacity(values.len());
        let mut offsets = Vec::with_capacity(values.len());
        for value in values {
            match value {
                DataValue::List(items) => {
                    elements.extend(items.iter().cloned());
                    nulls.push(DataValue::Int8(0));
                }
                DataValue::Null if nullable => nulls.push(DataValue::Int8(1)),
                other => {
                    return Err(TracedStorageError::invalid_argument(format!(
                        "{other:?} in array column {}",
                        meta.unique_id
                    )))
                }
            }
            offsets.push(DataValue::Int32(elements.len() as i32));
        }
        let child_opts = ColumnWriteOptions {
            bitmap_index: false,
            bloom_filter: false,
            ..opts.clone()
        };
        let offset_opts = ColumnWriteOptions {
            encoding: EncodingTypePb::PlainEncoding,
            ..child_opts.clone()
        };
        let unique_id = meta.unique_id;
        meta.children_columns
            .push(self.write_column(0, unique_id, element, true, &elements, &child_opts)?);
        if nullable {
            meta.children_columns
                .push(self.write_column(1, unique_id, &DataType::Int8, false, &nulls, &offset_opts)?);
        }
        meta.children_columns.push(self.write_column(
            meta.children_columns.len() as u32,
            unique_id,
            &DataType::Int32,
            false,
            &offsets,
            &offset_opts,
        )?);
        meta.total_mem_footprint = meta.children_columns.iter().map(|c| c.total_mem_footprint).sum();
        Ok(())
    }

    fn write_scalar(
        &mut self,
        meta: &mut ColumnMetaPb,
        ty: &DataType,
        values: &[DataValue],
        opts: &ColumnWriteOptions,
    ) -> StorageResult<()> {
        if opts.rows_per_page == 0 {
            return Err(TracedStorageError::invalid_argument("0 rows per page"));
        }
        let codec = get_block_compression_codec(opts.compression)?;
        let dict_encoded = opts.encoding == EncodingTypePb::DictEncoding;
        let mut dict: Vec<DataValue> = vec![];
        let mut codes: HashMap<DataValue, u32> = HashMap::new();

        let mut ordinal_entries = vec![];
        let mut zone_maps = vec![];
        let mut bloom_filters = vec![];
        let mut num_hashes = 0;
        let mut bitmap = BitmapIndexBuilder::new();
        let mut first_ordinal = 0;
        for page_values in values.chunks(opts.rows_per_page) {
            let array = ArrayImpl::from_values(ty, page_values);
            let mut body = vec![];
            if dict_encoded {
                for value in page_values {
                    let code = match value {
                        DataValue::Null => 0,
                        value => *codes.entry(value.clone()).or_insert_with(|| {
                            dict.push(value.clone());
                            dict.len() as u32 - 1
                        }),
                    };
                    body.put_u32_le(code);
                }
            } else {
                encode_plain_values(&array, &mut body);
            }
            let mut nullmap_size = 0;
            if meta.is_nullable {
                let nulls = encode_null_map(&array);
                nullmap_size = nulls.len() as u32;
                body.extend_from_slice(&nulls);
            }
            let footer = PageFooterPb {
                r#type: PageTypePb::DataPage as i32,
                data_page_footer: Some(DataPageFooterPb {
                    first_ordinal,
                    num_values: page_values.len() as u64,
                    nullmap_size,
                }),
                ..Default::default()
            };
            meta.total_mem_footprint += body.len() as u64;
            let pointer = write_page(&mut self.buf, &body, footer, codec);
            self.data_footprint += pointer.size as u64;
            ordinal_entries.push((first_ordinal, pointer));

            if opts.zone_map {
                zone_maps.push(build_zone_map(ty, array.values().collect::<Vec<_>>().iter()));
            }
            if opts.bloom_filter {
                let mut builder = BloomFilterBuilder::new(opts.rows_per_page, opts.bloom_filter_fpp);
                num_hashes = builder.num_hashes();
                for value in array.values() {
                    builder.add_value(&value);
                }
                bloom_filters.push(builder.finish());
            }
            if opts.bitmap_index {
                for (i, value) in array.values().enumerate() {
                    bitmap.add((first_ordinal as usize + i) as RowId, &value);
                }
            }
            first_ordinal += page_values.len() as u64;
        }

        if dict_encoded {
            meta.dict_page = Some(self.write_dictionary(ty, &dict, codec).to_pb());
        }
        let ordinal = self.write_ordinal_index(&ordinal_entries);
        meta.indexes.push(ColumnIndexMetaPb {
            r#type: ColumnIndexTypePb::OrdinalIndex as i32,
            ordinal_index: Some(ordinal),
            ..Default::default()
        });
        if opts.zone_map {
            let body = encode_zone_maps(&zone_maps);
            let page_zone_maps = self.indexed_page(&body, zone_maps.len());
            let all: Vec<DataValue> = ArrayImpl::from_values(ty, values).values().collect();
            meta.indexes.push(ColumnIndexMetaPb {
                r#type: ColumnIndexTypePb::ZoneMapIndex as i32,
                zone_map_index: Some(ZoneMapIndexPb {
                    page_zone_maps: Some(page_zone_maps),
                    segment_zone_map: Some(build_zone_map(ty, &all)),
                }),
                ..Default::default()
            });
        }
        if opts.bitmap_index {
            let bitmap_index = self.write_bitmap_index(ty, bitmap)?;
            meta.indexes.push(ColumnIndexMetaPb {
                r#type: ColumnIndexTypePb::BitmapIndex as i32,
                bitmap_index: Some(bitmap_index),
                ..Default::default()
            });
        }
        if opts.bloom_filter {
            let body = encode_bloom_filters(&bloom_filters);
            let bloom_filter = self.indexed_page(&body, bloom_filters.len());
            meta.indexes.push(ColumnIndexMetaPb {
                r#type: ColumnIndexTypePb::BloomFilterIndex as i32,
                bloom_filter_index: Some(BloomFilterIndexPb {
                    hash_strategy: HashStrategyPb::SipHash13 as i32,
                    num_hash_functions: num_hashes,
                    bloom_filter: Some(bloom_filter),
                }),
                ..Default::default()
            });
        }
        Ok(())
    }

    fn write_dictionary(
        &mut self,
        ty: &DataType,
        dict: &[DataValue],
        codec: Option<&dyn CompressionCodec>,
    ) -> PagePointer {
        let mut body = vec![];
        encode_plain_values(&ArrayImpl::from_values(ty, dict), &mut body);
        let footer = PageFooterPb {
            r#type: PageTypePb::DictionaryPage as i32,
            dict_page_footer: Some(DictPageFooterPb {
                encoding: EncodingTypePb::PlainEncoding as i32,
                num_values: dict.len() as u32,
            }),
            ..Default::default()
        };
        let pointer = write_page(&mut self.buf, &body, footer, codec);
        self.data_footprint += pointer.size as u64;
        pointer
    }

    /// A single page is referenced directly from the root.
    fn write_ordinal_index(&mut self, entries: &[(u64, PagePointer)]) -> OrdinalIndexPb {
        let root = match entries {
            [(_, page)] => BTreeMetaPb {
                root_page: Some(page.to_pb()),
                is_root_data_page: true,
            },
            entries => {
                let footer = PageFooterPb {
                    r#type: PageTypePb::IndexPage as i32,
                    index_page_footer: Some(IndexPageFooterPb {
                        num_entries: entries.len() as u32,
                    }),
                    ..Default::default()
                };
                let body = encode_ordinal_index(entries);
                BTreeMetaPb {
                    root_page: Some(self.index_page(&body, footer).to_pb()),
                    is_root_data_page: false,
                }
            }
        };
        OrdinalIndexPb {
            root_page: Some(root),
        }
    }

    fn write_bitmap_index(
        &mut self,
        ty: &DataType,
        builder: BitmapIndexBuilder,
    ) -> StorageResult<BitmapIndexPb> {
        let (dict, bitmaps, num_bitmaps, has_null) = builder.finish()?;
        let mut dict_body = vec![];
        encode_plain_values(&ArrayImpl::from_values(ty, &dict), &mut dict_body);
        let footer = PageFooterPb {
            r#type: PageTypePb::DataPage as i32,
            data_page_footer: Some(DataPageFooterPb {
                first_ordinal: 0,
                num_values: dict.len() as u64,
                nullmap_size: 0,
            }),
            ..Default::default()
        };
        let dict_page = self.index_page(&dict_body, footer);
        Ok(BitmapIndexPb {
            dict_column: Some(IndexedColumnMetaPb {
                num_values: dict.len() as u64,
                page: Some(dict_page.to_pb()),
            }),
            bitmap_column: Some(self.indexed_page(&bitmaps, num_bitmaps)),
            has_null,
        })
    }
}
