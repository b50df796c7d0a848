// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Column readers and iterators.
//!
//! A [`ColumnReader`] owns the metadata and indexes of one column of a segment.
//! Iterators created from it decode data pages into arrays. Array columns are
//! stored as child columns: elements, null flags (if nullable) and offsets.

mod array_iterator;
mod default_value;
mod lazy;
mod reader;
mod scalar_iterator;

use std::sync::Arc;

use risinglight_proto::segment::{ColumnMetaPb, FieldTypePb};

pub use self::array_iterator::*;
pub use self::default_value::*;
pub use self::lazy::*;
pub use self::reader::*;
pub use self::scalar_iterator::*;
use super::{
    ColumnPredicateRef, ReaderStatistics, SparseRange, StorageResult, TracedStorageError,
};
use crate::array::{Array, ArrayImpl};
use crate::types::{DataType, RowId};

#[derive(Debug, Clone, Default)]
pub struct ColumnIteratorOptions {
    pub use_page_cache: bool,
    pub stats: Option<Arc<ReaderStatistics>>,
}

/// Reads the rows of one column in ordinal order.
pub trait ColumnIterator: Send {
    fn init(&mut self, opts: ColumnIteratorOptions) -> StorageResult<()>;

    fn seek_to_first(&mut self) -> StorageResult<()>;

    /// Position at row `ordinal`. Seeking to the row count is allowed and reads nothing.
    fn seek_to_ordinal(&mut self, ordinal: RowId) -> StorageResult<()>;

    /// Row the next read starts at.
    fn current_ordinal(&self) -> RowId;

    /// Append up to `size` rows to `dst`. Returns how many rows were read, 0 at the end.
    fn next_batch(&mut self, size: usize, dst: &mut ArrayImpl) -> StorageResult<usize>;

    /// Append every row of `range` to `dst`.
    fn next_batch_range(&mut self, range: &SparseRange, dst: &mut ArrayImpl) -> StorageResult<()> {
        for r in range.iter() {
            self.seek_to_ordinal(r.begin())?;
            let mut remaining = r.span_size();
            while remaining > 0 {
                let read = self.next_batch(remaining, dst)?;
                if read == 0 {
                    return Err(TracedStorageError::corruption(format!(
                        "column ended at row {} inside range {r}",
                        self.current_ordinal()
                    )));
                }
                remaining -= read;
            }
        }
        Ok(())
    }

    /// Append the rows at `rowids`, in order, to `dst`.
    fn fetch_values_by_rowid(&mut self, rowids: &[RowId], dst: &mut ArrayImpl) -> StorageResult<()> {
        for &rowid in rowids {
            self.seek_to_ordinal(rowid)?;
            if self.next_batch(1, dst)? != 1 {
                return Err(TracedStorageError::not_found("row", rowid));
            }
        }
        Ok(())
    }

    /// Rows surviving the zone maps of this column.
    fn get_row_ranges_by_zone_map(
        &self,
        predicates: &[ColumnPredicateRef],
        del_predicate: Option<&ColumnPredicateRef>,
    ) -> StorageResult<ZoneMapFilterResult>;

    /// Narrow `row_ranges` with the bloom filters of this column.
    fn get_row_ranges_by_bloom_filter(
        &self,
        predicates: &[ColumnPredicateRef],
        row_ranges: &mut SparseRange,
    ) -> StorageResult<()>;
}

/// The logical type of a stored column.
pub fn data_type_from_meta(meta: &ColumnMetaPb) -> StorageResult<DataType> {
    let field_type = FieldTypePb::try_from(meta.r#type).unwrap_or(FieldTypePb::Unknown);
    let precision = meta.precision as u8;
    let scale = meta.scale as u8;
    let length = meta.length.max(0) as u32;
    Ok(match field_type {
        FieldTypePb::Boolean => DataType::Bool,
        FieldTypePb::TinyInt => DataType::Int8,
        FieldTypePb::SmallInt => DataType::Int16,
        FieldTypePb::Int => DataType::Int32,
        FieldTypePb::BigInt => DataType::Int64,
        FieldTypePb::LargeInt => DataType::Int128,
        FieldTypePb::Float => DataType::Float32,
        FieldTypePb::Double => DataType::Float64,
        FieldTypePb::Decimal32 => DataType::Decimal32(precision, scale),
        FieldTypePb::Decimal64 => DataType::Decimal64(precision, scale),
        FieldTypePb::Decimal128 => DataType::Decimal128(precision, scale),
        FieldTypePb::Date => DataType::Date,
        FieldTypePb::Datetime => DataType::Datetime,
        FieldTypePb::Char => DataType::Char(length),
        FieldTypePb::Varchar => DataType::Varchar(length),
        FieldTypePb::Array => {
            let element = meta.children_columns.first().ok_or_else(|| {
                TracedStorageError::corruption(format!(
                    "array column {} without children",
                    meta.unique_id
                ))
            })?;
            DataType::Array(Box::new(data_type_from_meta(element)?))
        }
        FieldTypePb::Unknown => {
            return Err(TracedStorageError::not_supported(format!(
                "column {} of type {}",
                meta.unique_id, meta.r#type
            )))
        }
    })
}

/// The stored type tag of `ty`.
pub fn field_type_of(ty: &DataType) -> FieldTypePb {
    match ty {
        DataType::Bool => FieldTypePb::Boolean,
        DataType::Int8 => FieldTypePb::TinyInt,
        DataType::Int16 => FieldTypePb::SmallInt,
        DataType::Int32 => FieldTypePb::Int,
        DataType::Int64 => FieldTypePb::BigInt,
        DataType::Int128 => FieldTypePb::LargeInt,
        DataType::Float32 => FieldTypePb::Float,
        DataType::Float64 => FieldTypePb::Double,
        DataType::Decimal32(..) => FieldTypePb::Decimal32,
        DataType::Decimal64(..) => FieldTypePb::Decimal64,
        DataType::Decimal128(..) => FieldTypePb::Decimal128,
        DataType::Date => FieldTypePb::Date,
        DataType::Datetime => FieldTypePb::Datetime,
        DataType::Char(_) => FieldTypePb::Char,
        DataType::Varchar(_) => FieldTypePb::Varchar,
        DataType::Array(_) => FieldTypePb::Array,
    }
}

/// Take the inner array of an `Int32` / `Int8` child batch.
fn child_values<'a, T>(
    array: &'a ArrayImpl,
    extract: impl FnOnce(&'a ArrayImpl) -> Option<&'a T>,
    what: &str,
) -> StorageResult<&'a T> {
    extract(array).ok_or_else(|| {
        TracedStorageError::corruption(format!(
            "{what} of array column stored as {}",
            array.type_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_from_meta() {
        let meta = ColumnMetaPb {
            r#type: FieldTypePb::Array as i32,
            children_columns: vec![ColumnMetaPb {
                r#type: FieldTypePb::Decimal64 as i32,
                precision: 12,
                scale: 3,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            data_type_from_meta(&meta).unwrap(),
            DataType::Array(Box::new(DataType::Decimal64(12, 3)))
        );
        let meta = ColumnMetaPb {
            r#type: 99,
            ..Default::default()
        };
        assert!(data_type_from_meta(&meta).unwrap_err().is_not_supported());
    }
}
