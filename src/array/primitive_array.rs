// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::iter::FromIterator;
use std::mem::size_of;

use bitvec::vec::BitVec;

use super::Array;
use crate::types::{DataValue, NativeType};

/// A collection of primitive types, such as `i32`, `f32`.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PrimitiveArray<T: NativeType> {
    valid: BitVec,
    data: Vec<T>,
}

// Enable `collect()` an array from iterator of `Option<T>`.
impl<T: NativeType> FromIterator<Option<T>> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut array = Self::with_capacity(iter.size_hint().0);
        for e in iter {
            array.push(e);
        }
        array
    }
}

// Enable `collect()` an array from iterator of `T`.
impl<T: NativeType> FromIterator<T> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().map(Some).collect()
    }
}

impl<T: NativeType> PrimitiveArray<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            valid: BitVec::with_capacity(capacity),
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&self, idx: usize) -> Option<T> {
        self.valid[idx].then(|| self.data[idx])
    }

    pub fn push(&mut self, value: Option<T>) {
        self.valid.push(value.is_some());
        self.data.push(value.unwrap_or_default());
    }

    /// Raw values, including the default placeholders of null rows.
    pub fn raw_data(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<T>> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }
}

impl<T: NativeType> Array for PrimitiveArray<T> {
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
        match self.get(idx) {
            Some(v) => v.to_value(),
            None => DataValue::Null,
        }
    }

    fn push_value(&mut self, value: &DataValue) {
        if value.is_null() {
            self.push(None);
            return;
        }
        let v = T::from_value(value).unwrap_or_else(|| {
            panic!("failed to push value: type mismatch ({value:?})")
        });
        self.push(Some(v));
    }

    fn append_nulls(&mut self, count: usize) {
        self.valid.resize(self.valid.len() + count, false);
        self.data.resize(self.data.len() + count, T::default());
    }

    fn append(&mut self, other: &Self, offset: usize, count: usize) {
        self.valid
            .extend_from_bitslice(&other.valid[offset..offset + count]);
        self.data
            .extend_from_slice(&other.data[offset..offset + count]);
    }

    fn append_repeated(&mut self, other: &Self, idx: usize, count: usize) {
        let valid = other.valid[idx];
        self.valid.resize(self.valid.len() + count, valid);
        self.data.resize(self.data.len() + count, other.data[idx]);
    }

    fn append_selective(&mut self, other: &Self, indexes: &[u32]) {
        self.reserve(indexes.len());
        for &i in indexes {
            self.valid.push(other.valid[i as usize]);
            self.data.push(other.data[i as usize]);
        }
    }

    fn filter_range(&mut self, selection: &[bool], from: usize, to: usize) -> usize {
        assert!(to <= self.len() && selection.len() >= to);
        let mut pos = from;
        for i in from..to {
            if selection[i] {
                self.data[pos] = self.data[i];
                let valid = self.valid[i];
                self.valid.set(pos, valid);
                pos += 1;
            }
        }
        self.data.truncate(pos);
        self.valid.truncate(pos);
        pos
    }

    fn resize(&mut self, len: usize) {
        self.valid.resize(len, true);
        self.data.resize(len, T::default());
    }

    fn reserve(&mut self, additional: usize) {
        self.valid.reserve(additional);
        self.data.reserve(additional);
    }

    fn clear(&mut self) {
        self.valid.clear();
        self.data.clear();
    }

    fn clone_empty(&self) -> Self {
        Self::with_capacity(0)
    }

    fn memory_usage(&self) -> usize {
        self.data.capacity() * size_of::<T>() + self.valid.capacity() / 8
    }

    fn byte_size(&self, _from: usize, count: usize) -> usize {
        count * (size_of::<T>() + 1)
    }
}
