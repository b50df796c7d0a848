// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use prost::Message;
use risinglight_proto::segment::{IndexedColumnMetaPb, PageTypePb, ZoneMapPb};

use super::indexed_column_page;
use crate::storage::mem_tracker::{message_mem_usage, MemUsage};
use crate::storage::segment::SegmentFile;
use crate::storage::{StorageResult, TracedStorageError};
use crate::types::{DataType, DataValue};

/// Decoded summary of a page or a whole segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneMapDetail {
    has_null: bool,
    has_not_null: bool,
    min: DataValue,
    max: DataValue,
    num_rows: usize,
}

impl ZoneMapDetail {
    pub fn new(min: DataValue, max: DataValue, has_null: bool, num_rows: usize) -> Self {
        let has_not_null = !min.is_null() || !max.is_null();
        Self {
            has_null,
            has_not_null,
            min,
            max,
            num_rows,
        }
    }

    /// Summary of `num_rows` null values.
    pub fn all_null(num_rows: usize) -> Self {
        Self::new(DataValue::Null, DataValue::Null, true, num_rows)
    }

    /// Parse a stored zone map. Values of decimal columns are read as their delegate integer.
    pub fn parse(ty: &DataType, pb: &ZoneMapPb, num_rows: usize) -> StorageResult<Self> {
        let ty = ty.delegate();
        let (min, max) = if pb.has_not_null {
            let parse = |s: &str| {
                ty.parse_value(s).map_err(|e| {
                    TracedStorageError::corruption(format!("invalid zone map value: {e}"))
                })
            };
            (parse(&pb.min)?, parse(&pb.max)?)
        } else {
            (DataValue::Null, DataValue::Null)
        };
        Ok(Self {
            has_null: pb.has_null,
            has_not_null: pb.has_not_null,
            min,
            max,
            num_rows,
        })
    }

    pub fn has_null(&self) -> bool {
        self.has_null
    }

    pub fn has_not_null(&self) -> bool {
        self.has_not_null
    }

    /// Smallest non-null value, `Null` if the zone holds nulls only.
    pub fn min(&self) -> &DataValue {
        &self.min
    }

    pub fn max(&self) -> &DataValue {
        &self.max
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }
}

/// Build the stored form of a zone map over `values`.
pub fn build_zone_map<'a>(ty: &DataType, values: impl IntoIterator<Item = &'a DataValue>) -> ZoneMapPb {
    let ty = ty.delegate();
    let mut pb = ZoneMapPb::default();
    let mut bounds: Option<(&DataValue, &DataValue)> = None;
    for v in values {
        if v.is_null() {
            pb.has_null = true;
            continue;
        }
        bounds = Some(match bounds {
            None => (v, v),
            Some((min, max)) => (min.min(v), max.max(v)),
        });
    }
    if let Some((min, max)) = bounds {
        pb.has_not_null = true;
        pb.min = ty.format_value(min);
        pb.max = ty.format_value(max);
    }
    pb
}

/// Per-page zone maps of a column.
#[derive(Debug, Clone, Default)]
pub struct ZoneMapIndexReader {
    page_zone_maps: Vec<ZoneMapPb>,
}

impl ZoneMapIndexReader {
    pub fn load(file: &SegmentFile, meta: Option<&IndexedColumnMetaPb>) -> StorageResult<Self> {
        let pointer = indexed_column_page(meta, "zone map")?;
        let page = file.read_index_page(pointer, PageTypePb::IndexPage)?;
        let num_values = meta.map_or(0, |m| m.num_values as usize);
        let mut body = &page.body[..];
        let mut page_zone_maps = Vec::with_capacity(num_values);
        for _ in 0..num_values {
            page_zone_maps.push(ZoneMapPb::decode_length_delimited(&mut body)?);
        }
        if !body.is_empty() {
            return Err(TracedStorageError::corruption(format!(
                "{}: {} trailing bytes in zone map page",
                file.name(),
                body.len()
            )));
        }
        Ok(Self { page_zone_maps })
    }

    pub fn num_pages(&self) -> usize {
        self.page_zone_maps.len()
    }

    pub fn page_zone_maps(&self) -> &[ZoneMapPb] {
        &self.page_zone_maps
    }
}

impl MemUsage for ZoneMapIndexReader {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.page_zone_maps.iter().map(message_mem_usage).sum::<usize>()
    }
}

/// Body of a zone map index page.
pub fn encode_zone_maps(zone_maps: &[ZoneMapPb]) -> Vec<u8> {
    let mut buf = vec![];
    for zm in zone_maps {
        buf.extend(zm.encode_length_delimited_to_vec());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_zone_map_uses_delegate() {
        let ty = DataType::Decimal64(10, 2);
        let values = [DataValue::Int64(150), DataValue::Null, DataValue::Int64(-5)];
        let pb = build_zone_map(&ty, &values);
        assert_eq!(pb.min, "-5");
        assert_eq!(pb.max, "150");
        let zm = ZoneMapDetail::parse(&ty, &pb, 3).unwrap();
        assert_eq!(zm.min(), &DataValue::Int64(-5));
        assert_eq!(zm.max(), &DataValue::Int64(150));
        assert!(zm.has_null() && zm.has_not_null());
    }

    #[test]
    fn all_null_zone_map() {
        let pb = build_zone_map(&DataType::Date, &[DataValue::Null]);
        let zm = ZoneMapDetail::parse(&DataType::Date, &pb, 1).unwrap();
        assert_eq!(zm, ZoneMapDetail::all_null(1));
    }

    #[test]
    fn bad_value_is_corruption() {
        let pb = ZoneMapPb {
            min: "x".into(),
            max: "1".into(),
            has_null: false,
            has_not_null: true,
        };
        assert!(ZoneMapDetail::parse(&DataType::Int32, &pb, 1)
            .unwrap_err()
            .is_corruption());
    }
}
