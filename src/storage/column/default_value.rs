// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use super::{ColumnIterator, ColumnIteratorOptions, ZoneMapFilterResult};
use crate::array::{Array, ArrayImpl};
use crate::storage::{ColumnPredicateRef, SparseRange, StorageResult, TracedStorageError};
use crate::types::{DataType, RowId};

/// The literal that makes a default value null.
const NULL_LITERAL: &str = "NULL";

/// Produces the default value of a column the segment was written without.
pub struct DefaultValueColumnIterator {
    name: String,
    data_type: DataType,
    is_nullable: bool,
    default_value: Option<String>,
    num_rows: RowId,
    current_ordinal: RowId,
    /// The value as a single-row array, built by `init`.
    value: Option<ArrayImpl>,
}

impl DefaultValueColumnIterator {
    pub fn new(
        name: impl Into<String>,
        data_type: DataType,
        is_nullable: bool,
        default_value: Option<String>,
        num_rows: RowId,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_nullable,
            default_value,
            num_rows,
            current_ordinal: 0,
            value: None,
        }
    }

    fn value(&self) -> StorageResult<&ArrayImpl> {
        self.value.as_ref().ok_or_else(|| {
            TracedStorageError::internal(format!(
                "default value iterator of column {} used before init",
                self.name
            ))
        })
    }

    fn check_row(&self, rowid: RowId) -> StorageResult<()> {
        if rowid >= self.num_rows {
            return Err(TracedStorageError::not_found(
                "row",
                format!("{rowid} of column {} with {} rows", self.name, self.num_rows),
            ));
        }
        Ok(())
    }

    fn append(&self, count: usize, dst: &mut ArrayImpl) -> StorageResult<()> {
        dst.append_repeated(self.value()?, 0, count);
        Ok(())
    }
}

impl ColumnIterator for DefaultValueColumnIterator {
    fn init(&mut self, _opts: ColumnIteratorOptions) -> StorageResult<()> {
        let mut value = ArrayImpl::new_for(&self.data_type, 1);
        match self.default_value.as_deref() {
            Some(NULL_LITERAL) => value.append_nulls(1),
            Some(_) if self.data_type.is_array() => {
                return Err(TracedStorageError::not_supported(
                    "Array default type is unsupported",
                ))
            }
            Some(literal) => {
                let parsed = self.data_type.parse_value(literal).map_err(|e| {
                    TracedStorageError::internal(format!(
                        "invalid default value of column {}: {e}",
                        self.name
                    ))
                })?;
                value.push_value(&parsed);
            }
            None if self.is_nullable => value.append_nulls(1),
            None => {
                return Err(TracedStorageError::internal(format!(
                    "invalid default value column({}) for no default value and not nullable",
                    self.name
                )))
            }
        }
        self.value = Some(value);
        Ok(())
    }

    fn seek_to_first(&mut self) -> StorageResult<()> {
        self.seek_to_ordinal(0)
    }

    fn seek_to_ordinal(&mut self, ordinal: RowId) -> StorageResult<()> {
        if ordinal > self.num_rows {
            return Err(TracedStorageError::not_found(
                "row",
                format!("{ordinal} of column {} with {} rows", self.name, self.num_rows),
            ));
        }
        self.current_ordinal = ordinal;
        Ok(())
    }

    fn current_ordinal(&self) -> RowId {
        self.current_ordinal
    }

    fn next_batch(&mut self, size: usize, dst: &mut ArrayImpl) -> StorageResult<usize> {
        let count = size.min((self.num_rows - self.current_ordinal) as usize);
        self.append(count, dst)?;
        self.current_ordinal += count as RowId;
        Ok(count)
    }

    fn next_batch_range(&mut self, range: &SparseRange, dst: &mut ArrayImpl) -> StorageResult<()> {
        if !range.is_empty() {
            self.check_row(range.end() - 1)?;
            self.current_ordinal = range.end();
        }
        self.append(range.span_size(), dst)
    }

    fn fetch_values_by_rowid(&mut self, rowids: &[RowId], dst: &mut ArrayImpl) -> StorageResult<()> {
        for &rowid in rowids {
            self.check_row(rowid)?;
        }
        self.append(rowids.len(), dst)
    }

    fn get_row_ranges_by_zone_map(
        &self,
        _predicates: &[ColumnPredicateRef],
        del_predicate: Option<&ColumnPredicateRef>,
    ) -> StorageResult<ZoneMapFilterResult> {
        let row_ranges = SparseRange::from_range(0, self.num_rows);
        Ok(ZoneMapFilterResult {
            del_partial_ranges: if del_predicate.is_some() {
                row_ranges.clone()
            } else {
                SparseRange::new()
            },
            row_ranges,
            ..Default::default()
        })
    }

    fn get_row_ranges_by_bloom_filter(
        &self,
        _predicates: &[ColumnPredicateRef],
        _row_ranges: &mut SparseRange,
    ) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Range;
    use crate::types::DataValue;

    fn iter(ty: DataType, nullable: bool, default: Option<&str>) -> DefaultValueColumnIterator {
        DefaultValueColumnIterator::new("c", ty, nullable, default.map(String::from), 10)
    }

    #[test]
    fn replicates_parsed_value() {
        let mut it = iter(DataType::Int32, false, Some("7"));
        it.init(ColumnIteratorOptions::default()).unwrap();
        let mut dst = ArrayImpl::new_for(&DataType::Int32, 0);
        assert_eq!(it.next_batch(4, &mut dst).unwrap(), 4);
        assert_eq!(it.next_batch(100, &mut dst).unwrap(), 6);
        assert_eq!(it.next_batch(100, &mut dst).unwrap(), 0);
        assert_eq!(dst.len(), 10);
        assert!(dst.values().all(|v| v == DataValue::Int32(7)));
    }

    #[test]
    fn fetches_parsed_value_by_row_id() {
        let mut it = iter(DataType::Int32, false, Some("7"));
        it.init(ColumnIteratorOptions::default()).unwrap();
        let mut dst = ArrayImpl::new_for(&DataType::Int32, 0);
        it.fetch_values_by_rowid(&[0, 4, 9, 4], &mut dst).unwrap();
        assert_eq!(dst.len(), 4);
        assert!(!dst.has_null());
        assert_eq!(dst.values().collect::<Vec<_>>(), vec![DataValue::Int32(7); 4]);
    }

    #[test]
    fn null_defaults() {
        for default in [Some("NULL"), None] {
            let mut it = iter(DataType::Varchar(10), true, default);
            it.init(ColumnIteratorOptions::default()).unwrap();
            let mut dst = ArrayImpl::new_for(&DataType::Varchar(10), 0);
            it.fetch_values_by_rowid(&[1, 5, 9], &mut dst).unwrap();
            assert_eq!(dst.len(), 3);
            assert!((0..3).all(|i| dst.is_null(i)));
        }
    }

    #[test]
    fn ranges_and_row_ids() {
        let mut it = iter(DataType::Varchar(10), false, Some("abc"));
        it.init(ColumnIteratorOptions::default()).unwrap();
        let mut dst = ArrayImpl::new_for(&DataType::Varchar(10), 0);
        let mut range = SparseRange::new();
        range.add(Range::new(1, 3));
        range.add(Range::new(6, 8));
        it.next_batch_range(&range, &mut dst).unwrap();
        assert_eq!(dst.len(), 4);
        assert_eq!(dst.value_at(3), DataValue::String("abc".into()));
        let err = it.fetch_values_by_rowid(&[10], &mut dst).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn invalid_defaults() {
        let err = iter(DataType::Int32, false, None)
            .init(ColumnIteratorOptions::default())
            .unwrap_err();
        assert!(err.is_internal());
        let err = iter(DataType::Array(Box::new(DataType::Int32)), true, Some("[1]"))
            .init(ColumnIteratorOptions::default())
            .unwrap_err();
        assert!(err.is_not_supported());
        let err = iter(DataType::Int8, false, Some("1000"))
            .init(ColumnIteratorOptions::default())
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn zone_map_keeps_all_rows() {
        let it = iter(DataType::Int32, true, None);
        let result = it.get_row_ranges_by_zone_map(&[], None).unwrap();
        assert_eq!(result.row_ranges, SparseRange::from_range(0, 10));
        assert!(result.del_partial_ranges.is_empty());
    }
}
