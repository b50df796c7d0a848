// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use super::ChunkIterator;
use crate::array::{Array, ArrayImpl, Chunk, Schema, SchemaRef};
use crate::storage::{ColumnPredicateRef, SegmentReadOptions, StorageResult, TracedStorageError};
use crate::types::{ColumnId, DataType};

/// Reads a segment whose stored column types differ from the requested ones.
///
/// The inner iterator reads chunks of the stored types. Each chunk is then
/// converted to the output schema. Predicates are rewritten to the stored
/// types where the constant fits, the rest are evaluated after conversion.
pub struct SegmentChunkIteratorAdapter {
    out_schema: SchemaRef,
    in_schema: SchemaRef,
    in_read_options: SegmentReadOptions,
    /// Predicates evaluated on converted chunks, by output column.
    post_predicates: HashMap<ColumnId, Vec<ColumnPredicateRef>>,
    iter: Option<Box<dyn ChunkIterator>>,
}

/// Whether values stored as `from` can be read as `to`.
fn can_convert(from: &DataType, to: &DataType) -> bool {
    use DataType as T;
    if from == to || (from.is_string() && to.is_string()) {
        return true;
    }
    let width = |ty: &DataType| ty.fixed_width().unwrap_or(0);
    match (from, to) {
        (T::Float32, T::Float64) => true,
        (a, b) if a.is_integer() && b.is_integer() => width(a) <= width(b),
        (
            T::Decimal32(_, s1) | T::Decimal64(_, s1) | T::Decimal128(_, s1),
            T::Decimal32(_, s2) | T::Decimal64(_, s2) | T::Decimal128(_, s2),
        ) => s1 == s2 && width(from) <= width(to),
        (T::Array(a), T::Array(b)) => can_convert(a, b),
        _ => false,
    }
}

impl SegmentChunkIteratorAdapter {
    /// Plan the conversion of `out_schema` from columns stored as `storage_types`,
    /// which is indexed by column id.
    pub fn prepare(
        storage_types: &[DataType],
        out_schema: SchemaRef,
        read_options: &SegmentReadOptions,
    ) -> StorageResult<Self> {
        let storage_type = |cid: ColumnId| {
            storage_types.get(cid as usize).ok_or_else(|| {
                TracedStorageError::invalid_argument(format!(
                    "column {cid} out of range, segment has {} columns",
                    storage_types.len()
                ))
            })
        };

        let mut in_fields = Vec::with_capacity(out_schema.num_fields());
        for field in out_schema.fields() {
            let stored = storage_type(field.id())?;
            if !can_convert(stored, field.data_type()) {
                return Err(TracedStorageError::not_supported(format!(
                    "read column {} of type {stored} as {}",
                    field.name(),
                    field.data_type()
                )));
            }
            in_fields.push(field.with_type(stored.clone()));
        }
        let in_schema: SchemaRef = Arc::new(in_fields.into_iter().collect::<Schema>());

        let mut in_read_options = read_options.clone();
        let mut post_predicates: HashMap<ColumnId, Vec<ColumnPredicateRef>> = HashMap::new();
        let mut predicates = HashMap::with_capacity(read_options.predicates.len());
        for (&cid, preds) in &read_options.predicates {
            let stored = storage_type(cid)?;
            let converted: &mut Vec<_> = predicates.entry(cid).or_default();
            for pred in preds {
                match pred.convert_to(stored) {
                    Some(pred) => converted.push(pred),
                    None => post_predicates.entry(cid).or_default().push(pred.clone()),
                }
            }
        }
        in_read_options.predicates = predicates;

        let mut delete_predicates = HashMap::with_capacity(read_options.delete_predicates.len());
        for (&cid, pred) in &read_options.delete_predicates {
            let stored = storage_type(cid)?;
            let pred = pred.convert_to(stored).ok_or_else(|| {
                TracedStorageError::not_supported(format!(
                    "delete predicate on column {cid} can not be applied to type {stored}"
                ))
            })?;
            delete_predicates.insert(cid, pred);
        }
        in_read_options.delete_predicates = delete_predicates;

        Ok(Self {
            out_schema,
            in_schema,
            in_read_options,
            post_predicates,
            iter: None,
        })
    }

    pub fn in_schema(&self) -> &SchemaRef {
        &self.in_schema
    }

    pub fn in_read_options(&self) -> &SegmentReadOptions {
        &self.in_read_options
    }

    pub fn set_iterator(&mut self, iter: Box<dyn ChunkIterator>) {
        self.iter = Some(iter);
    }

    fn convert(&self, chunk: &Chunk) -> StorageResult<Chunk> {
        let mut columns = Vec::with_capacity(self.out_schema.num_fields());
        for (idx, field) in self.out_schema.fields().iter().enumerate() {
            let src = chunk.get_column_by_index(idx);
            if self.in_schema.field(idx).data_type() == field.data_type() {
                columns.push(src.clone());
                continue;
            }
            let mut dst = ArrayImpl::new_for(field.data_type(), src.len());
            for value in src.values() {
                let value = value.cast_to(field.data_type()).ok_or_else(|| {
                    TracedStorageError::internal(format!(
                        "failed to convert {value:?} of column {} to {}",
                        field.name(),
                        field.data_type()
                    ))
                })?;
                dst.push_value(&value);
            }
            columns.push(dst);
        }
        Ok(Chunk::with_schema(columns, self.out_schema.clone()))
    }
}

impl ChunkIterator for SegmentChunkIteratorAdapter {
    fn schema(&self) -> &SchemaRef {
        &self.out_schema
    }

    fn next_batch(&mut self) -> StorageResult<Option<Chunk>> {
        loop {
            let iter = self
                .iter
                .as_mut()
                .ok_or_else(|| TracedStorageError::internal("adapter has no iterator"))?;
            let Some(chunk) = iter.next_batch()? else {
                return Ok(None);
            };
            let mut chunk = self.convert(&chunk)?;
            if self.post_predicates.is_empty() {
                return Ok(Some(chunk));
            }
            let mut selection = vec![true; chunk.num_rows()];
            for (&cid, preds) in &self.post_predicates {
                if let Some(column) = chunk.get_column_by_id(cid) {
                    for pred in preds {
                        pred.evaluate_and(column, &mut selection);
                    }
                }
            }
            chunk.filter(&selection);
            if chunk.num_rows() > 0 {
                return Ok(Some(chunk));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Field;
    use crate::storage::{CompareOp, ComparePredicate};
    use crate::types::DataValue;

    struct VecIterator {
        schema: SchemaRef,
        chunks: Vec<Chunk>,
    }

    impl ChunkIterator for VecIterator {
        fn schema(&self) -> &SchemaRef {
            &self.schema
        }

        fn next_batch(&mut self) -> StorageResult<Option<Chunk>> {
            Ok(self.chunks.pop())
        }
    }

    fn pred(op: CompareOp, value: i64) -> ColumnPredicateRef {
        Arc::new(ComparePredicate::new(0, op, DataValue::Int64(value)))
    }

    fn out_schema() -> SchemaRef {
        Arc::new(
            [
                Field::new(0, "k", DataType::Int64, false),
                Field::new(1, "v", DataType::Varchar(20), true),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn converts_columns_and_predicates() {
        let storage = [DataType::Int32, DataType::Char(5)];
        let mut opts = SegmentReadOptions::default();
        opts.predicates.insert(
            0,
            vec![pred(CompareOp::Gt, 1), pred(CompareOp::Lt, i64::MAX)],
        );
        let mut adapter = SegmentChunkIteratorAdapter::prepare(&storage, out_schema(), &opts).unwrap();
        assert_eq!(adapter.in_schema().field(0).data_type(), &DataType::Int32);
        assert_eq!(adapter.in_read_options().predicates[&0].len(), 1);

        let values = [1, 2, 3].map(DataValue::Int32);
        let strings = ["a", "b", "c"].map(|s| DataValue::String(s.into()));
        let chunk = Chunk::with_schema(
            [
                ArrayImpl::from_values(&DataType::Int32, &values),
                ArrayImpl::from_values(&DataType::Char(5), &strings),
            ],
            adapter.in_schema().clone(),
        );
        adapter.set_iterator(Box::new(VecIterator {
            schema: adapter.in_schema().clone(),
            chunks: vec![chunk],
        }));
        let chunk = adapter.next_batch().unwrap().unwrap();
        assert_eq!(chunk.num_rows(), 3);
        assert_eq!(chunk.get_column_by_id(0).unwrap().value_at(2), DataValue::Int64(3));
        assert!(adapter.next_batch().unwrap().is_none());
    }

    #[test]
    fn post_predicate_filters_converted_rows() {
        let storage = [DataType::Int32, DataType::Varchar(20)];
        let mut opts = SegmentReadOptions::default();
        opts.predicates.insert(0, vec![pred(CompareOp::Ne, i64::MAX)]);
        let mut adapter = SegmentChunkIteratorAdapter::prepare(&storage, out_schema(), &opts).unwrap();
        assert!(adapter.in_read_options().predicates[&0].is_empty());
        let values = [4, 5].map(DataValue::Int32);
        let chunk = Chunk::with_schema(
            [
                ArrayImpl::from_values(&DataType::Int32, &values),
                ArrayImpl::from_values(&DataType::Varchar(20), &[DataValue::Null, DataValue::Null]),
            ],
            adapter.in_schema().clone(),
        );
        adapter.set_iterator(Box::new(VecIterator {
            schema: adapter.in_schema().clone(),
            chunks: vec![chunk],
        }));
        assert_eq!(adapter.next_batch().unwrap().unwrap().num_rows(), 2);
    }

    #[test]
    fn rejects_narrowing() {
        let storage = [DataType::Int128, DataType::Varchar(20)];
        let err = SegmentChunkIteratorAdapter::prepare(
            &storage,
            out_schema(),
            &SegmentReadOptions::default(),
        )
        .err()
        .unwrap();
        assert!(err.is_not_supported());

        let mut adapter = SegmentChunkIteratorAdapter::prepare(
            &[DataType::Int64, DataType::Varchar(20)],
            out_schema(),
            &SegmentReadOptions::default(),
        )
        .unwrap();
        assert!(adapter.next_batch().unwrap_err().is_internal());
    }
}
