// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::mem::size_of;

use bitvec::vec::BitVec;

use super::Array;
use crate::types::DataValue;

/// A collection of variable-length UTF-8 strings.
///
/// String `i` occupies `data[offset[i]..offset[i + 1]]`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Utf8Array {
    offset: Vec<usize>,
    valid: BitVec,
    data: Vec<u8>,
}

impl Default for Utf8Array {
    fn default() -> Self {
        Self::with_capacity(0, 0)
    }
}

impl<'a> FromIterator<Option<&'a str>> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = Option<&'a str>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut array = Self::with_capacity(iter.size_hint().0, 0);
        for e in iter {
            array.push(e);
        }
        array
    }
}

impl<'a> FromIterator<&'a str> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(Some).collect()
    }
}

impl Utf8Array {
    pub fn with_capacity(capacity: usize, data_capacity: usize) -> Self {
        let mut offset = Vec::with_capacity(capacity + 1);
        offset.push(0);
        Self {
            offset,
            valid: BitVec::with_capacity(capacity),
            data: Vec::with_capacity(data_capacity),
        }
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        if self.valid[idx] {
            Some(self.get_unchecked(idx))
        } else {
            None
        }
    }

    fn get_unchecked(&self, idx: usize) -> &str {
        let bytes = &self.data[self.offset[idx]..self.offset[idx + 1]];
        // bytes only ever come from `&str` pushes
        std::str::from_utf8(bytes).unwrap_or_default()
    }

    pub fn push(&mut self, value: Option<&str>) {
        self.valid.push(value.is_some());
        if let Some(s) = value {
            self.data.extend_from_slice(s.as_bytes());
        }
        self.offset.push(self.data.len());
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }

    /// Length of string payload in bytes.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

impl Array for Utf8Array {
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
            Some(s) => DataValue::String(s.to_string()),
            None => DataValue::Null,
        }
    }

    fn push_value(&mut self, value: &DataValue) {
        match value {
            DataValue::Null => self.push(None),
            DataValue::String(s) => self.push(Some(s)),
            _ => panic!("failed to push value: type mismatch ({value:?})"),
        }
    }

    fn append_nulls(&mut self, count: usize) {
        self.valid.resize(self.valid.len() + count, false);
        let end = self.data.len();
        self.offset.resize(self.offset.len() + count, end);
    }

    fn append(&mut self, other: &Self, offset: usize, count: usize) {
        let begin = other.offset[offset];
        let end = other.offset[offset + count];
        let base = self.data.len();
        self.data.extend_from_slice(&other.data[begin..end]);
        self.offset.extend(
            other.offset[offset + 1..=offset + count]
                .iter()
                .map(|o| o - begin + base),
        );
        self.valid
            .extend_from_bitslice(&other.valid[offset..offset + count]);
    }

    fn append_repeated(&mut self, other: &Self, idx: usize, count: usize) {
        let bytes = &other.data[other.offset[idx]..other.offset[idx + 1]];
        self.data.reserve(bytes.len() * count);
        for _ in 0..count {
            self.data.extend_from_slice(bytes);
            self.offset.push(self.data.len());
        }
        let valid = other.valid[idx];
        self.valid.resize(self.valid.len() + count, valid);
    }

    fn append_selective(&mut self, other: &Self, indexes: &[u32]) {
        self.offset.reserve(indexes.len());
        for &i in indexes {
            let i = i as usize;
            self.data
                .extend_from_slice(&other.data[other.offset[i]..other.offset[i + 1]]);
            self.offset.push(self.data.len());
            self.valid.push(other.valid[i]);
        }
    }

    fn filter_range(&mut self, selection: &[bool], from: usize, to: usize) -> usize {
        assert!(to <= self.len() && selection.len() >= to);
        let mut pos = from;
        let mut write = self.offset[from];
        let mut start = self.offset[from];
        for i in from..to {
            let end = self.offset[i + 1];
            if selection[i] {
                self.data.copy_within(start..end, write);
                write += end - start;
                let valid = self.valid[i];
                self.valid.set(pos, valid);
                pos += 1;
                self.offset[pos] = write;
            }
            start = end;
        }
        self.data.truncate(write);
        self.offset.truncate(pos + 1);
        self.valid.truncate(pos);
        pos
    }

    fn resize(&mut self, len: usize) {
        if len <= self.len() {
            self.data.truncate(self.offset[len]);
            self.offset.truncate(len + 1);
            self.valid.truncate(len);
        } else {
            let end = self.data.len();
            self.offset.resize(len + 1, end);
            self.valid.resize(len, true);
        }
    }

    fn reserve(&mut self, additional: usize) {
        self.offset.reserve(additional);
        self.valid.reserve(additional);
    }

    fn clear(&mut self) {
        self.offset.truncate(1);
        self.valid.clear();
        self.data.clear();
    }

    fn clone_empty(&self) -> Self {
        Self::default()
    }

    fn memory_usage(&self) -> usize {
        self.offset.capacity() * size_of::<usize>()
            + self.data.capacity()
            + self.valid.capacity() / 8
    }

    fn byte_size(&self, from: usize, count: usize) -> usize {
        self.offset[from + count] - self.offset[from] + count * (size_of::<usize>() + 1)
    }
}
