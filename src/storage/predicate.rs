// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Predicates on a single column, evaluated against indexes and rows.
//!
//! Values held by predicates use the physical representation of the column
//! (e.g. decimals are their unscaled integers, dates are days since epoch).

use std::fmt;
use std::sync::Arc;

use parse_display::Display;

use super::{
    BitmapIndexIterator, BloomFilter, Range, SparseRange, StorageResult, TracedStorageError,
    ZoneMapDetail,
};
use crate::array::{Array, ArrayImpl};
use crate::types::{ColumnId, DataType, DataValue};

pub type ColumnPredicateRef = Arc<dyn ColumnPredicate>;

/// A predicate on one column.
///
/// Index tests may have false positives but never false negatives.
pub trait ColumnPredicate: Send + Sync + fmt::Debug {
    fn column_id(&self) -> ColumnId;

    /// Whether a row holding `value` satisfies the predicate.
    fn evaluate(&self, value: &DataValue) -> bool;

    /// Clear the `selection` flag of every row of `column` failing the predicate.
    fn evaluate_and(&self, column: &ArrayImpl, selection: &mut [bool]) {
        for (i, selected) in selection.iter_mut().enumerate().take(column.len()) {
            if *selected && !self.evaluate(&column.value_at(i)) {
                *selected = false;
            }
        }
    }

    /// Whether a zone may hold satisfying rows.
    fn zone_map_filter(&self, detail: &ZoneMapDetail) -> bool;

    fn support_bloom_filter(&self) -> bool {
        false
    }

    /// Whether a page with this bloom filter may hold satisfying rows.
    fn bloom_filter(&self, _filter: &BloomFilter) -> bool {
        true
    }

    /// Dictionary ordinals of a bitmap index whose rows satisfy the predicate.
    ///
    /// `None` if the predicate cannot be answered by a bitmap index.
    fn bitmap_ordinals(&self, _iter: &mut BitmapIndexIterator) -> StorageResult<Option<SparseRange>> {
        Ok(None)
    }

    /// The same predicate over a column stored as `ty`, if its values can be represented.
    fn convert_to(&self, ty: &DataType) -> Option<ColumnPredicateRef>;

    /// Reject values a column of type `ty` can not hold.
    fn check_type(&self, _ty: &DataType) -> StorageResult<()> {
        Ok(())
    }
}

fn check_value_type(column_id: ColumnId, value: &DataValue, ty: &DataType) -> StorageResult<()> {
    if ArrayImpl::new_for(ty, 0).accepts(value) {
        return Ok(());
    }
    Err(TracedStorageError::invalid_argument(format!(
        "predicate value {value} on column {column_id} does not match type {ty}"
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CompareOp {
    #[display("=")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
}

/// `column <op> value`. Null rows never match.
#[derive(Debug, Clone)]
pub struct ComparePredicate {
    column_id: ColumnId,
    op: CompareOp,
    value: DataValue,
}

impl ComparePredicate {
    pub fn new(column_id: ColumnId, op: CompareOp, value: DataValue) -> Self {
        Self {
            column_id,
            op,
            value,
        }
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn value(&self) -> &DataValue {
        &self.value
    }
}

impl ColumnPredicate for ComparePredicate {
    fn column_id(&self) -> ColumnId {
        self.column_id
    }

    fn evaluate(&self, value: &DataValue) -> bool {
        if value.is_null() || self.value.is_null() {
            return false;
        }
        match self.op {
            CompareOp::Eq => *value == self.value,
            CompareOp::Ne => *value != self.value,
            CompareOp::Lt => *value < self.value,
            CompareOp::Le => *value <= self.value,
            CompareOp::Gt => *value > self.value,
            CompareOp::Ge => *value >= self.value,
        }
    }

    fn zone_map_filter(&self, detail: &ZoneMapDetail) -> bool {
        if !detail.has_not_null() || self.value.is_null() {
            return false;
        }
        let (min, max, v) = (detail.min(), detail.max(), &self.value);
        match self.op {
            CompareOp::Eq => min <= v && v <= max,
            CompareOp::Ne => !(min == v && max == v),
            CompareOp::Lt => min < v,
            CompareOp::Le => min <= v,
            CompareOp::Gt => max > v,
            CompareOp::Ge => max >= v,
        }
    }

    fn support_bloom_filter(&self) -> bool {
        self.op == CompareOp::Eq
    }

    fn bloom_filter(&self, filter: &BloomFilter) -> bool {
        self.op != CompareOp::Eq || filter.test_value(&self.value)
    }

    fn bitmap_ordinals(&self, iter: &mut BitmapIndexIterator) -> StorageResult<Option<SparseRange>> {
        let num_dict = iter.num_dict_values() as u32;
        let (pos, exact) = match iter.seek_dictionary(&self.value) {
            Ok(exact) => (iter.current_ordinal() as u32, exact),
            Err(e) if e.is_not_found() => (num_dict, false),
            Err(e) => return Err(e),
        };
        let after = if exact { pos + 1 } else { pos };
        let mut ordinals = SparseRange::new();
        match self.op {
            CompareOp::Eq if exact => ordinals.add(Range::new(pos, pos + 1)),
            CompareOp::Eq => {}
            CompareOp::Ne => {
                ordinals.add(Range::new(0, pos));
                ordinals.add(Range::new(after, num_dict));
            }
            CompareOp::Lt => ordinals.add(Range::new(0, pos)),
            CompareOp::Le => ordinals.add(Range::new(0, after)),
            CompareOp::Gt => ordinals.add(Range::new(after, num_dict)),
            CompareOp::Ge => ordinals.add(Range::new(pos, num_dict)),
        }
        Ok(Some(ordinals))
    }

    fn convert_to(&self, ty: &DataType) -> Option<ColumnPredicateRef> {
        let value = self.value.cast_to(ty)?;
        Some(Arc::new(Self::new(self.column_id, self.op, value)))
    }

    fn check_type(&self, ty: &DataType) -> StorageResult<()> {
        check_value_type(self.column_id, &self.value, ty)
    }
}

/// `column IN (values)`.
#[derive(Debug, Clone)]
pub struct InListPredicate {
    column_id: ColumnId,
    values: Vec<DataValue>,
}

impl InListPredicate {
    pub fn new(column_id: ColumnId, values: impl IntoIterator<Item = DataValue>) -> Self {
        let mut values = values
            .into_iter()
            .filter(|v| !v.is_null())
            .collect::<Vec<_>>();
        values.sort();
        values.dedup();
        Self { column_id, values }
    }
}

impl ColumnPredicate for InListPredicate {
    fn column_id(&self) -> ColumnId {
        self.column_id
    }

    fn evaluate(&self, value: &DataValue) -> bool {
        self.values.binary_search(value).is_ok()
    }

    fn zone_map_filter(&self, detail: &ZoneMapDetail) -> bool {
        detail.has_not_null()
            && self
                .values
                .iter()
                .any(|v| detail.min() <= v && v <= detail.max())
    }

    fn support_bloom_filter(&self) -> bool {
        true
    }

    fn bloom_filter(&self, filter: &BloomFilter) -> bool {
        self.values.iter().any(|v| filter.test_value(v))
    }

    fn bitmap_ordinals(&self, iter: &mut BitmapIndexIterator) -> StorageResult<Option<SparseRange>> {
        let mut ordinals = SparseRange::new();
        for v in &self.values {
            match iter.seek_dictionary(v) {
                Ok(true) => {
                    let pos = iter.current_ordinal() as u32;
                    ordinals.add(Range::new(pos, pos + 1));
                }
                Ok(false) => {}
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Some(ordinals))
    }

    fn convert_to(&self, ty: &DataType) -> Option<ColumnPredicateRef> {
        let values = self
            .values
            .iter()
            .map(|v| v.cast_to(ty))
            .collect::<Option<Vec<_>>>()?;
        Some(Arc::new(Self::new(self.column_id, values)))
    }

    fn check_type(&self, ty: &DataType) -> StorageResult<()> {
        self.values
            .iter()
            .try_for_each(|v| check_value_type(self.column_id, v, ty))
    }
}

/// `column IS [NOT] NULL`.
#[derive(Debug, Clone)]
pub struct NullPredicate {
    column_id: ColumnId,
    is_null: bool,
}

impl NullPredicate {
    pub fn is_null(column_id: ColumnId) -> Self {
        Self {
            column_id,
            is_null: true,
        }
    }

    pub fn is_not_null(column_id: ColumnId) -> Self {
        Self {
            column_id,
            is_null: false,
        }
    }
}

impl ColumnPredicate for NullPredicate {
    fn column_id(&self) -> ColumnId {
        self.column_id
    }

    fn evaluate(&self, value: &DataValue) -> bool {
        value.is_null() == self.is_null
    }

    fn zone_map_filter(&self, detail: &ZoneMapDetail) -> bool {
        if self.is_null {
            detail.has_null()
        } else {
            detail.has_not_null()
        }
    }

    fn support_bloom_filter(&self) -> bool {
        self.is_null
    }

    fn bloom_filter(&self, filter: &BloomFilter) -> bool {
        !self.is_null || filter.has_null()
    }

    fn bitmap_ordinals(&self, iter: &mut BitmapIndexIterator) -> StorageResult<Option<SparseRange>> {
        let num_dict = iter.num_dict_values() as u32;
        let mut ordinals = SparseRange::new();
        if !self.is_null {
            ordinals.add(Range::new(0, num_dict));
        } else if iter.has_null_bitmap() {
            let null_ordinal = iter.bitmap_nums() as u32 - 1;
            ordinals.add(Range::new(null_ordinal, null_ordinal + 1));
        }
        Ok(Some(ordinals))
    }

    fn convert_to(&self, _ty: &DataType) -> Option<ColumnPredicateRef> {
        Some(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn zone(min: i32, max: i32) -> ZoneMapDetail {
        ZoneMapDetail::new(DataValue::Int32(min), DataValue::Int32(max), false, 100)
    }

    #[test_case(CompareOp::Gt, 150, false, true; "greater")]
    #[test_case(CompareOp::Eq, 55, false, false; "gap between pages")]
    #[test_case(CompareOp::Le, 60, true, true; "boundary")]
    #[test_case(CompareOp::Ne, 0, true, true; "not equal")]
    fn zone_map_pruning(op: CompareOp, v: i32, page0: bool, page1: bool) {
        let pred = ComparePredicate::new(0, op, DataValue::Int32(v));
        assert_eq!(pred.zone_map_filter(&zone(0, 50)), page0);
        assert_eq!(pred.zone_map_filter(&zone(60, 199)), page1);
    }

    #[test]
    fn null_rows_never_compare() {
        let pred = ComparePredicate::new(0, CompareOp::Ne, DataValue::Int32(1));
        assert!(!pred.evaluate(&DataValue::Null));
        assert!(!pred.zone_map_filter(&ZoneMapDetail::all_null(10)));
        assert!(NullPredicate::is_null(0).zone_map_filter(&ZoneMapDetail::all_null(10)));
        assert!(!NullPredicate::is_not_null(0).zone_map_filter(&ZoneMapDetail::all_null(10)));
    }

    #[test]
    fn in_list() {
        let pred = InListPredicate::new(0, [DataValue::Int32(7), DataValue::Null, DataValue::Int32(3)]);
        assert!(pred.evaluate(&DataValue::Int32(3)));
        assert!(!pred.evaluate(&DataValue::Null));
        assert!(pred.zone_map_filter(&zone(5, 10)));
        assert!(!pred.zone_map_filter(&zone(4, 6)));
    }

    #[test]
    fn convert_widens_or_gives_up() {
        let pred = ComparePredicate::new(0, CompareOp::Lt, DataValue::Int64(10));
        let converted = pred.convert_to(&DataType::Int16).unwrap();
        assert!(converted.evaluate(&DataValue::Int16(9)));
        let pred = ComparePredicate::new(0, CompareOp::Lt, DataValue::Int64(1 << 40));
        assert!(pred.convert_to(&DataType::Int16).is_none());
    }

    #[test]
    fn values_must_match_column_type() {
        let pred = ComparePredicate::new(0, CompareOp::Gt, DataValue::Int64(1));
        assert!(pred.check_type(&DataType::Int64).is_ok());
        assert!(pred.check_type(&DataType::Int32).unwrap_err().is_invalid_argument());
        let pred = ComparePredicate::new(0, CompareOp::Eq, DataValue::Int32(3));
        assert!(pred.check_type(&DataType::Date).is_ok());
        assert!(pred.check_type(&DataType::Varchar(4)).is_err());
        let pred = InListPredicate::new(0, [DataValue::Int32(1), DataValue::String("x".into())]);
        assert!(pred.check_type(&DataType::Int32).unwrap_err().is_invalid_argument());
        assert!(NullPredicate::is_null(0).check_type(&DataType::Int32).is_ok());
    }

    #[test]
    fn evaluate_batch() {
        let column = ArrayImpl::from_values(
            &DataType::Int32,
            &[DataValue::Int32(1), DataValue::Null, DataValue::Int32(5)],
        );
        let mut selection = vec![true; 3];
        ComparePredicate::new(0, CompareOp::Ge, DataValue::Int32(2)).evaluate_and(&column, &mut selection);
        assert_eq!(selection, vec![false, false, true]);
    }
}
