// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use bitvec::vec::BitVec;

use super::{Array, ArrayImpl};
use crate::types::DataValue;

/// A collection of variable-length lists sharing one element array.
///
/// List `i` holds `elements[offsets[i]..offsets[i + 1]]`.
#[derive(Clone, PartialEq, Debug)]
pub struct ListArray {
    offsets: Vec<u32>,
    valid: BitVec,
    elements: Box<ArrayImpl>,
}

impl ListArray {
    /// Create an empty list array over an (empty) element array.
    pub fn new(elements: ArrayImpl) -> Self {
        let mut list = Self {
            offsets: vec![0],
            valid: BitVec::new(),
            elements: Box::new(elements),
        };
        list.elements.clear();
        list
    }

    pub fn elements(&self) -> &ArrayImpl {
        &self.elements
    }

    /// Mutable access to the element array, used by readers that decode
    /// elements before the list bounds.
    pub fn elements_mut(&mut self) -> &mut ArrayImpl {
        &mut self.elements
    }

    /// Close a list whose `size` elements were already appended to the element array.
    pub fn push_bounds(&mut self, size: u32, valid: bool) {
        let last = self.last_offset();
        self.offsets.push(last + size);
        self.valid.push(valid);
        debug_assert!(self.last_offset() as usize <= self.elements.len());
    }

    /// Element range of list `idx`.
    pub fn bounds(&self, idx: usize) -> (usize, usize) {
        (self.offsets[idx] as usize, self.offsets[idx + 1] as usize)
    }

    fn last_offset(&self) -> u32 {
        self.offsets.last().copied().unwrap_or_default()
    }

    fn append_list(&mut self, other: &Self, idx: usize) {
        let (begin, end) = other.bounds(idx);
        self.elements.append(&other.elements, begin, end - begin);
        self.push_bounds((end - begin) as u32, other.valid[idx]);
    }
}

impl Array for ListArray {
    fn len(&self) -> usize {
        self.valid.len()
    }

    fn is_null(&self, idx: usize) -> bool {
        !self.valid[idx]
    }

    fn has_null(&self) -> bool {
        !self.valid.all()
    }

    fn value_at(&self, idx: usize) -> DataValue {
        if !self.valid[idx] {
            return DataValue::Null;
        }
        let (begin, end) = self.bounds(idx);
        DataValue::List((begin..end).map(|i| self.elements.value_at(i)).collect())
    }

    fn push_value(&mut self, value: &DataValue) {
        match value {
            DataValue::Null => self.push_bounds(0, false),
            DataValue::List(items) => {
                for item in items {
                    self.elements.push_value(item);
                }
                self.push_bounds(items.len() as u32, true);
            }
            _ => panic!("failed to push value: type mismatch ({value:?})"),
        }
    }

    fn append_nulls(&mut self, count: usize) {
        let last = self.last_offset();
        self.offsets.resize(self.offsets.len() + count, last);
        self.valid.resize(self.valid.len() + count, false);
    }

    fn append(&mut self, other: &Self, offset: usize, count: usize) {
        for idx in offset..offset + count {
            self.append_list(other, idx);
        }
    }

    fn append_repeated(&mut self, other: &Self, idx: usize, count: usize) {
        for _ in 0..count {
            self.append_list(other, idx);
        }
    }

    fn append_selective(&mut self, other: &Self, indexes: &[u32]) {
        for &idx in indexes {
            self.append_list(other, idx as usize);
        }
    }

    fn filter_range(&mut self, selection: &[bool], from: usize, to: usize) -> usize {
        assert!(to <= self.len() && selection.len() >= to);
        let mut filtered = Self::new(self.elements.clone_empty());
        filtered.append(self, 0, from);
        for i in from..to {
            if selection[i] {
                filtered.append_list(self, i);
            }
        }
        *self = filtered;
        self.len()
    }

    fn resize(&mut self, len: usize) {
        if len <= self.len() {
            self.offsets.truncate(len + 1);
            self.valid.truncate(len);
            let end = self.last_offset() as usize;
            self.elements.resize(end);
        } else {
            let last = self.last_offset();
            self.offsets.resize(len + 1, last);
            self.valid.resize(len, true);
        }
    }

    fn reserve(&mut self, additional: usize) {
        self.offsets.reserve(additional);
        self.valid.reserve(additional);
    }

    fn clear(&mut self) {
        self.offsets.truncate(1);
        self.valid.clear();
        self.elements.clear();
    }

    fn clone_empty(&self) -> Self {
        Self::new(self.elements.clone_empty())
    }

    fn memory_usage(&self) -> usize {
        self.offsets.capacity() * size_of::<u32>()
            + self.valid.capacity() / 8
            + self.elements.memory_usage()
    }

    fn byte_size(&self, from: usize, count: usize) -> usize {
        let begin = self.offsets[from] as usize;
        let end = self.offsets[from + count] as usize;
        self.elements.byte_size(begin, end - begin) + count * (size_of::<u32>() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn list(values: &[i32]) -> DataValue {
        DataValue::List(values.iter().map(|v| DataValue::Int32(*v)).collect())
    }

    fn sample() -> ListArray {
        let mut array = ListArray::new(ArrayImpl::new_for(&DataType::Int32, 0));
        array.push_value(&list(&[1, 2]));
        array.push_value(&DataValue::Null);
        array.push_value(&list(&[]));
        array.push_value(&list(&[3, 4, 5]));
        array
    }

    #[test]
    fn values_round_through_offsets() {
        let array = sample();
        assert_eq!(array.len(), 4);
        assert_eq!(array.value_at(0), list(&[1, 2]));
        assert_eq!(array.value_at(1), DataValue::Null);
        assert_eq!(array.value_at(2), list(&[]));
        assert_eq!(array.elements().len(), 5);
    }

    #[test]
    fn filter_rebuilds_elements() {
        let mut array = sample();
        assert_eq!(array.filter(&[false, true, false, true]), 2);
        assert_eq!(array.value_at(1), list(&[3, 4, 5]));
        assert_eq!(array.elements().len(), 3);
    }

    #[test]
    fn resize_truncates_elements() {
        let mut array = sample();
        array.resize(1);
        assert_eq!(array.elements().len(), 2);
        array.resize(2);
        assert_eq!(array.value_at(1), list(&[]));
    }
}
