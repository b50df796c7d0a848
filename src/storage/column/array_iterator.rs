// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use super::{child_values, ColumnIterator, ColumnIteratorOptions, ZoneMapFilterResult};
use crate::array::{ArrayImpl, I32Array, I8Array};
use crate::storage::{ColumnPredicateRef, SparseRange, StorageResult, TracedStorageError};
use crate::types::RowId;

fn as_offsets(array: &ArrayImpl) -> StorageResult<&I32Array> {
    child_values(
        array,
        |a| match a {
            ArrayImpl::Int32(a) => Some(a),
            _ => None,
        },
        "offsets",
    )
}

fn as_null_flags(array: &ArrayImpl) -> StorageResult<&I8Array> {
    child_values(
        array,
        |a| match a {
            ArrayImpl::Int8(a) => Some(a),
            _ => None,
        },
        "null flags",
    )
}

/// End offset of row `idx` in the element column.
fn end_offset(offsets: &I32Array, idx: usize) -> StorageResult<u32> {
    match offsets.get(idx) {
        Some(v) if v >= 0 => Ok(v as u32),
        other => Err(TracedStorageError::corruption(format!(
            "invalid array offset {other:?}"
        ))),
    }
}

/// Reads an array column from its children.
///
/// The offsets child holds the cumulative end offset of every row in the element
/// child. The optional null flags child holds 1 for null rows.
pub struct ArrayColumnIterator {
    num_rows: RowId,
    elements: Box<dyn ColumnIterator>,
    nulls: Option<Box<dyn ColumnIterator>>,
    offsets: Box<dyn ColumnIterator>,
    current_ordinal: RowId,
    element_ordinal: u32,
}

impl ArrayColumnIterator {
    pub fn new(
        num_rows: RowId,
        elements: Box<dyn ColumnIterator>,
        nulls: Option<Box<dyn ColumnIterator>>,
        offsets: Box<dyn ColumnIterator>,
    ) -> Self {
        Self {
            num_rows,
            elements,
            nulls,
            offsets,
            current_ordinal: 0,
            element_ordinal: 0,
        }
    }
}

impl ColumnIterator for ArrayColumnIterator {
    fn init(&mut self, opts: ColumnIteratorOptions) -> StorageResult<()> {
        self.elements.init(opts.clone())?;
        if let Some(nulls) = &mut self.nulls {
            nulls.init(opts.clone())?;
        }
        self.offsets.init(opts)
    }

    fn seek_to_first(&mut self) -> StorageResult<()> {
        self.seek_to_ordinal(0)
    }

    fn seek_to_ordinal(&mut self, ordinal: RowId) -> StorageResult<()> {
        let element_ordinal = if ordinal == 0 {
            0
        } else {
            self.offsets.seek_to_ordinal(ordinal - 1)?;
            let mut prev = ArrayImpl::Int32(I32Array::with_capacity(1));
            if self.offsets.next_batch(1, &mut prev)? != 1 {
                return Err(TracedStorageError::not_found("row", ordinal));
            }
            end_offset(as_offsets(&prev)?, 0)?
        };
        self.offsets.seek_to_ordinal(ordinal)?;
        if let Some(nulls) = &mut self.nulls {
            nulls.seek_to_ordinal(ordinal)?;
        }
        self.elements.seek_to_ordinal(element_ordinal)?;
        self.current_ordinal = ordinal;
        self.element_ordinal = element_ordinal;
        Ok(())
    }

    fn current_ordinal(&self) -> RowId {
        self.current_ordinal
    }

    fn next_batch(&mut self, size: usize, dst: &mut ArrayImpl) -> StorageResult<usize> {
        let list = match dst {
            ArrayImpl::List(list) => list,
            other => {
                return Err(TracedStorageError::internal(format!(
                    "array column read into {} array",
                    other.type_name()
                )))
            }
        };
        let mut offsets = ArrayImpl::Int32(I32Array::with_capacity(size));
        let read = self.offsets.next_batch(size, &mut offsets)?;
        if read == 0 {
            return Ok(0);
        }
        let offsets = as_offsets(&offsets)?;

        let null_flags = match &mut self.nulls {
            Some(nulls) => {
                let mut flags = ArrayImpl::Int8(I8Array::with_capacity(read));
                if nulls.next_batch(read, &mut flags)? != read {
                    return Err(TracedStorageError::corruption(format!(
                        "null flags of array column end before row {}",
                        self.current_ordinal + read as RowId
                    )));
                }
                Some(flags)
            }
            None => None,
        };
        let null_flags = null_flags.as_ref().map(as_null_flags).transpose()?;

        let last = end_offset(offsets, read - 1)?;
        let mut remaining = last.checked_sub(self.element_ordinal).ok_or_else(|| {
            TracedStorageError::corruption(format!(
                "array offsets go backwards: {} after {}",
                last, self.element_ordinal
            ))
        })? as usize;
        while remaining > 0 {
            let n = self.elements.next_batch(remaining, list.elements_mut())?;
            if n == 0 {
                return Err(TracedStorageError::corruption(format!(
                    "array elements end at {}, expect {last}",
                    self.elements.current_ordinal()
                )));
            }
            remaining -= n;
        }

        let mut prev = self.element_ordinal;
        for i in 0..read {
            let end = end_offset(offsets, i)?;
            if end < prev {
                return Err(TracedStorageError::corruption(format!(
                    "array offsets go backwards: {end} after {prev}"
                )));
            }
            let valid = null_flags.map_or(true, |flags| flags.get(i) != Some(1));
            list.push_bounds(end - prev, valid);
            prev = end;
        }
        self.element_ordinal = last;
        self.current_ordinal += read as RowId;
        Ok(read)
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
