// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use smallvec::SmallVec;

use super::*;
use crate::types::{ColumnId, DataValue, SlotId, TupleId};

pub type Columns = SmallVec<[ArrayImpl; 16]>;

/// How a chunk relates to the delete predicates of its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteState {
    #[default]
    NotSatisfied,
    Satisfied,
    PartialSatisfied,
}

/// A vectorized batch: equal-length columns plus the ways to address them.
///
/// Columns are addressed by position, by column id through the paired schema,
/// by slot id, or by tuple id.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    columns: Columns,
    schema: Option<SchemaRef>,
    cid_to_index: HashMap<ColumnId, usize>,
    slot_id_to_index: HashMap<SlotId, usize>,
    tuple_id_to_index: HashMap<TupleId, usize>,
    delete_state: DeleteState,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chunk whose columns are paired with the fields of `schema`.
    pub fn with_schema(columns: impl IntoIterator<Item = ArrayImpl>, schema: SchemaRef) -> Self {
        let mut chunk = Self {
            columns: columns.into_iter().collect(),
            schema: Some(schema),
            ..Default::default()
        };
        chunk.rebuild_cid_index();
        chunk.check_or_die();
        chunk
    }

    /// A chunk whose columns are addressed by slot id.
    pub fn with_slots(
        columns: impl IntoIterator<Item = ArrayImpl>,
        slot_map: HashMap<SlotId, usize>,
    ) -> Self {
        Self::with_slots_and_tuples(columns, slot_map, HashMap::new())
    }

    pub fn with_slots_and_tuples(
        columns: impl IntoIterator<Item = ArrayImpl>,
        slot_map: HashMap<SlotId, usize>,
        tuple_map: HashMap<TupleId, usize>,
    ) -> Self {
        let chunk = Self {
            columns: columns.into_iter().collect(),
            slot_id_to_index: slot_map,
            tuple_id_to_index: tuple_map,
            ..Default::default()
        };
        chunk.check_or_die();
        chunk
    }

    /// Return the number of rows in the chunk.
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn columns(&self) -> &[ArrayImpl] {
        &self.columns
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub fn delete_state(&self) -> DeleteState {
        self.delete_state
    }

    pub fn set_delete_state(&mut self, state: DeleteState) {
        self.delete_state = state;
    }

    pub fn get_column_by_index(&self, idx: usize) -> &ArrayImpl {
        &self.columns[idx]
    }

    pub fn get_column_by_index_mut(&mut self, idx: usize) -> &mut ArrayImpl {
        &mut self.columns[idx]
    }

    pub fn get_column_by_id(&self, cid: ColumnId) -> Option<&ArrayImpl> {
        self.cid_to_index.get(&cid).map(|&idx| &self.columns[idx])
    }

    pub fn get_column_by_id_mut(&mut self, cid: ColumnId) -> Option<&mut ArrayImpl> {
        let idx = *self.cid_to_index.get(&cid)?;
        Some(&mut self.columns[idx])
    }

    pub fn get_column_by_slot_id(&self, slot: SlotId) -> Option<&ArrayImpl> {
        self.slot_id_to_index.get(&slot).map(|&idx| &self.columns[idx])
    }

    pub fn get_tuple_column_by_id(&self, tuple: TupleId) -> Option<&ArrayImpl> {
        self.tuple_id_to_index
            .get(&tuple)
            .map(|&idx| &self.columns[idx])
    }

    pub fn is_slot_exist(&self, slot: SlotId) -> bool {
        self.slot_id_to_index.contains_key(&slot)
    }

    pub fn is_tuple_exist(&self, tuple: TupleId) -> bool {
        self.tuple_id_to_index.contains_key(&tuple)
    }

    /// Name of the column at `idx`, if the chunk is schema-addressed.
    pub fn get_column_name(&self, idx: usize) -> Option<&str> {
        self.schema.as_ref().map(|s| s.field(idx).name())
    }

    pub fn slot_id_to_index(&self) -> &HashMap<SlotId, usize> {
        &self.slot_id_to_index
    }

    pub fn tuple_id_to_index(&self) -> &HashMap<TupleId, usize> {
        &self.tuple_id_to_index
    }

    fn schema_mut(&mut self) -> &mut Schema {
        Arc::make_mut(self.schema.get_or_insert_with(Default::default))
    }

    fn rebuild_cid_index(&mut self) {
        self.cid_to_index.clear();
        if let Some(schema) = &self.schema {
            for (idx, field) in schema.fields().iter().enumerate() {
                self.cid_to_index.insert(field.id(), idx);
            }
        }
    }

    /// Append a column paired with `field`.
    pub fn append_column(&mut self, column: ArrayImpl, field: FieldRef) {
        debug_assert!(!self.cid_to_index.contains_key(&field.id()));
        self.cid_to_index.insert(field.id(), self.columns.len());
        self.columns.push(column);
        self.schema_mut().append(field);
        self.check_or_die();
    }

    /// Append a column addressed by `slot`.
    pub fn append_column_with_slot(&mut self, column: ArrayImpl, slot: SlotId) {
        self.slot_id_to_index.insert(slot, self.columns.len());
        self.columns.push(column);
        self.check_or_die();
    }

    /// Replace the column addressed by `slot`, or append it if the slot is new.
    pub fn update_column(&mut self, column: ArrayImpl, slot: SlotId) {
        match self.slot_id_to_index.get(&slot) {
            Some(&idx) => self.columns[idx] = column,
            None => self.append_column_with_slot(column, slot),
        }
        self.check_or_die();
    }

    pub fn append_tuple_column(&mut self, column: ArrayImpl, tuple: TupleId) {
        self.tuple_id_to_index.insert(tuple, self.columns.len());
        self.columns.push(column);
        self.check_or_die();
    }

    /// Insert a column paired with `field` at position `idx`.
    pub fn insert_column(&mut self, idx: usize, column: ArrayImpl, field: FieldRef) {
        self.columns.insert(idx, column);
        self.schema_mut().insert(idx, field);
        self.rebuild_cid_index();
        self.check_or_die();
    }

    /// Remove the column at `idx`. Shifts the positions of later columns.
    pub fn remove_column_by_index(&mut self, idx: usize) -> ArrayImpl {
        let column = self.columns.remove(idx);
        if self.schema.is_some() {
            self.schema_mut().remove(idx);
            self.rebuild_cid_index();
        }
        for map in [&mut self.slot_id_to_index, &mut self.tuple_id_to_index] {
            map.retain(|_, i| *i != idx);
            for i in map.values_mut() {
                if *i > idx {
                    *i -= 1;
                }
            }
        }
        column
    }

    /// Remove several columns. `indexes` may be in any order.
    pub fn remove_columns_by_index(&mut self, indexes: &[usize]) {
        for idx in indexes.iter().copied().sorted().dedup().collect::<Vec<_>>().into_iter().rev() {
            self.remove_column_by_index(idx);
        }
    }

    /// Clear the contents of every column and the delete state. Columns,
    /// addressing maps and allocated capacity are kept.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.delete_state = DeleteState::NotSatisfied;
    }

    pub fn swap_chunk(&mut self, other: &mut Chunk) {
        std::mem::swap(self, other);
    }

    /// Truncate, or pad with default values, every column to `num_rows`.
    pub fn set_num_rows(&mut self, num_rows: usize) {
        for column in &mut self.columns {
            column.resize(num_rows);
        }
    }

    pub fn reserve(&mut self, capacity: usize) {
        for column in &mut self.columns {
            column.reserve(capacity);
        }
    }

    fn clone_empty_parts(&self, capacity: usize) -> Columns {
        self.columns
            .iter()
            .map(|c| {
                let mut empty = c.clone_empty();
                empty.reserve(capacity);
                empty
            })
            .collect()
    }

    /// An empty chunk with the same column types and the same addressing,
    /// reserving the current row count.
    pub fn clone_empty(&self) -> Self {
        self.clone_empty_with_capacity(self.num_rows())
    }

    /// An empty chunk with the same column types and addressing, reserving `capacity` rows.
    pub fn clone_empty_with_capacity(&self, capacity: usize) -> Self {
        if self.columns.len() == self.slot_id_to_index.len() {
            self.clone_empty_with_slot(capacity)
        } else {
            self.clone_empty_with_schema(capacity)
        }
    }

    pub fn clone_empty_with_slot(&self, capacity: usize) -> Self {
        Self {
            columns: self.clone_empty_parts(capacity),
            slot_id_to_index: self.slot_id_to_index.clone(),
            ..Default::default()
        }
    }

    pub fn clone_empty_with_schema(&self, capacity: usize) -> Self {
        Self {
            columns: self.clone_empty_parts(capacity),
            schema: self.schema.clone(),
            cid_to_index: self.cid_to_index.clone(),
            ..Default::default()
        }
    }

    pub fn clone_empty_with_tuple(&self, capacity: usize) -> Self {
        Self {
            columns: self.clone_empty_parts(capacity),
            slot_id_to_index: self.slot_id_to_index.clone(),
            tuple_id_to_index: self.tuple_id_to_index.clone(),
            ..Default::default()
        }
    }

    /// A deep copy with its own schema instance.
    pub fn clone_unique(&self) -> Self {
        let mut chunk = self.clone();
        if let Some(schema) = &chunk.schema {
            chunk.schema = Some(Arc::new(Schema::clone(schema)));
        }
        chunk
    }

    /// Append `count` rows of `src` starting at `offset`, column by column.
    pub fn append(&mut self, src: &Chunk, offset: usize, count: usize) {
        debug_assert_eq!(self.num_columns(), src.num_columns());
        for (dst, src) in self.columns.iter_mut().zip_eq(src.columns.iter()) {
            dst.append(src, offset, count);
        }
        self.check_or_die();
    }

    /// Append rows of `src` whose slots also exist in `self`, matched by slot id.
    pub fn append_safe(&mut self, src: &Chunk, offset: usize, count: usize) {
        for (slot, &idx) in &self.slot_id_to_index {
            if let Some(&src_idx) = src.slot_id_to_index.get(slot) {
                self.columns[idx].append(&src.columns[src_idx], offset, count);
            }
        }
        self.check_or_die();
    }

    /// Append rows `indexes[from..from + size]` of `src`.
    pub fn append_selective(&mut self, src: &Chunk, indexes: &[u32], from: usize, size: usize) {
        let indexes = &indexes[from..from + size];
        for (dst, src) in self.columns.iter_mut().zip_eq(src.columns.iter()) {
            dst.append_selective(src, indexes);
        }
        self.check_or_die();
    }

    /// Like [`Chunk::append_selective`], but releases each source column once copied
    /// to bound the peak memory of the move.
    pub fn rolling_append_selective(
        &mut self,
        src: &mut Chunk,
        indexes: &[u32],
        from: usize,
        size: usize,
    ) {
        let indexes = &indexes[from..from + size];
        for (dst, src) in self.columns.iter_mut().zip_eq(src.columns.iter_mut()) {
            dst.append_selective(src, indexes);
            *src = src.clone_empty();
        }
        self.check_or_die();
    }

    /// Keep the rows whose `selection` flag is set. Returns the new row count.
    pub fn filter(&mut self, selection: &[bool]) -> usize {
        let num_rows = self.num_rows();
        self.filter_range(selection, 0, num_rows)
    }

    /// Filter rows in `[from, to)`, keep rows before `from` and drop rows after `to`.
    pub fn filter_range(&mut self, selection: &[bool], from: usize, to: usize) -> usize {
        for column in &mut self.columns {
            column.filter_range(selection, from, to);
        }
        self.check_or_die();
        self.num_rows()
    }

    /// Move the slot-addressed columns of `other` into `self`, in column order.
    pub fn merge(&mut self, mut other: Chunk) {
        debug_assert_eq!(self.num_rows(), other.num_rows());
        let slots = other
            .slot_id_to_index
            .iter()
            .map(|(&slot, &idx)| (idx, slot))
            .sorted()
            .collect_vec();
        for (idx, slot) in slots {
            let placeholder = ArrayImpl::from(I8Array::default());
            let column = std::mem::replace(&mut other.columns[idx], placeholder);
            self.append_column_with_slot(column, slot);
        }
    }

    /// The values of row `idx`.
    pub fn get(&self, idx: usize) -> Vec<DataValue> {
        self.columns.iter().map(|c| c.value_at(idx)).collect()
    }

    /// Bytes allocated by all columns.
    pub fn memory_usage(&self) -> usize {
        self.columns.iter().map(|c| c.memory_usage()).sum()
    }

    pub fn bytes_usage(&self) -> usize {
        self.bytes_usage_range(0, self.num_rows())
    }

    /// Payload bytes of `count` rows starting at `from`.
    pub fn bytes_usage_range(&self, from: usize, count: usize) -> usize {
        self.columns.iter().map(|c| c.byte_size(from, count)).sum()
    }

    /// Render row `idx` as `[v1, v2, ...]`.
    pub fn debug_row(&self, idx: usize) -> String {
        format!("[{}]", self.get(idx).iter().join(", "))
    }

    /// Check that every column has the same length and every addressing map
    /// points at an existing column. Only checked in debug builds.
    pub fn check_or_die(&self) {
        if cfg!(debug_assertions) {
            let num_rows = self.num_rows();
            for (idx, column) in self.columns.iter().enumerate() {
                assert_eq!(
                    column.len(),
                    num_rows,
                    "column {idx} has {} rows, expected {num_rows}",
                    column.len()
                );
            }
            if self.columns.is_empty() {
                assert!(
                    self.cid_to_index.is_empty() && self.slot_id_to_index.is_empty(),
                    "addressing maps of a chunk without columns must be empty"
                );
            }
            if let Some(schema) = &self.schema {
                assert!(schema.num_fields() <= self.columns.len());
                for (&cid, &idx) in &self.cid_to_index {
                    assert!(
                        idx < schema.num_fields(),
                        "column {cid} maps to index {idx} beyond {} fields",
                        schema.num_fields()
                    );
                    assert_eq!(
                        schema.field(idx).id(),
                        cid,
                        "column {cid} maps to field {idx} of another column"
                    );
                }
            }
            for idx in self
                .cid_to_index
                .values()
                .chain(self.slot_id_to_index.values())
                .chain(self.tuple_id_to_index.values())
            {
                assert!(*idx < self.columns.len(), "dangling column index {idx}");
            }
        }
    }
}
