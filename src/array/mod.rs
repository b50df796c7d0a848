// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! In-memory columnar arrays and the [`Chunk`] batch built from them.

use crate::types::{DataType, DataValue};

mod chunk;
mod list_array;
mod primitive_array;
mod schema;
mod utf8_array;

pub use self::chunk::*;
pub use self::list_array::*;
pub use self::primitive_array::*;
pub use self::schema::*;
pub use self::utf8_array::*;

/// A trait over all arrays.
///
/// Arrays are append-mostly mutable buffers. Every operation that takes another
/// array expects it to have the same concrete type.
pub trait Array: Clone + Send + Sync + Sized + 'static {
    /// Number of items of array.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_null(&self, idx: usize) -> bool;

    /// Whether any item is null.
    fn has_null(&self) -> bool;

    /// Retrieve the value at `idx` as an owned scalar.
    fn value_at(&self, idx: usize) -> DataValue;

    /// Append a scalar. Panics if the value does not match the array type.
    fn push_value(&mut self, value: &DataValue);

    fn append_nulls(&mut self, count: usize);

    /// Append `count` items of `other` starting at `offset`.
    fn append(&mut self, other: &Self, offset: usize, count: usize);

    /// Append the item `other[idx]` `count` times.
    fn append_repeated(&mut self, other: &Self, idx: usize, count: usize);

    /// Append the items of `other` at `indexes`, in order.
    fn append_selective(&mut self, other: &Self, indexes: &[u32]);

    /// Keep rows in `[0, from)` and the rows `i` in `[from, to)` with `selection[i]` set.
    /// Rows at or after `to` are dropped. Returns the new length.
    fn filter_range(&mut self, selection: &[bool], from: usize, to: usize) -> usize;

    /// Keep the rows whose `selection` flag is set. Returns the new length.
    fn filter(&mut self, selection: &[bool]) -> usize {
        let len = self.len();
        self.filter_range(selection, 0, len)
    }

    /// Truncate, or pad with default non-null values, to `len` items.
    fn resize(&mut self, len: usize);

    fn reserve(&mut self, additional: usize);

    fn clear(&mut self);

    /// An empty array of the same type.
    fn clone_empty(&self) -> Self;

    /// Bytes allocated by this array.
    fn memory_usage(&self) -> usize;

    /// Bytes of payload held by `count` items starting at `from`.
    fn byte_size(&self, from: usize, count: usize) -> usize;
}

pub type BoolArray = PrimitiveArray<bool>;
pub type I8Array = PrimitiveArray<i8>;
pub type I16Array = PrimitiveArray<i16>;
pub type I32Array = PrimitiveArray<i32>;
pub type I64Array = PrimitiveArray<i64>;
pub type I128Array = PrimitiveArray<i128>;
pub type F32Array = PrimitiveArray<f32>;
pub type F64Array = PrimitiveArray<f64>;

/// Embeds all types of arrays in `array` module.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayImpl {
    Bool(BoolArray),
    Int8(I8Array),
    Int16(I16Array),
    Int32(I32Array),
    Int64(I64Array),
    Int128(I128Array),
    Float32(F32Array),
    Float64(F64Array),
    Utf8(Utf8Array),
    List(ListArray),
}

/// Runs `$body` with `$array` bound to the inner array of every variant.
macro_rules! dispatch {
    ($self:expr, $array:ident => $body:expr) => {
        match $self {
            ArrayImpl::Bool($array) => $body,
            ArrayImpl::Int8($array) => $body,
            ArrayImpl::Int16($array) => $body,
            ArrayImpl::Int32($array) => $body,
            ArrayImpl::Int64($array) => $body,
            ArrayImpl::Int128($array) => $body,
            ArrayImpl::Float32($array) => $body,
            ArrayImpl::Float64($array) => $body,
            ArrayImpl::Utf8($array) => $body,
            ArrayImpl::List($array) => $body,
        }
    };
}

/// Like [`dispatch`], but wraps the result back into the same variant.
macro_rules! dispatch_wrap {
    ($self:expr, $array:ident => $body:expr) => {
        match $self {
            ArrayImpl::Bool($array) => ArrayImpl::Bool($body),
            ArrayImpl::Int8($array) => ArrayImpl::Int8($body),
            ArrayImpl::Int16($array) => ArrayImpl::Int16($body),
            ArrayImpl::Int32($array) => ArrayImpl::Int32($body),
            ArrayImpl::Int64($array) => ArrayImpl::Int64($body),
            ArrayImpl::Int128($array) => ArrayImpl::Int128($body),
            ArrayImpl::Float32($array) => ArrayImpl::Float32($body),
            ArrayImpl::Float64($array) => ArrayImpl::Float64($body),
            ArrayImpl::Utf8($array) => ArrayImpl::Utf8($body),
            ArrayImpl::List($array) => ArrayImpl::List($body),
        }
    };
}

/// Runs `$body` on two arrays of the same variant, panics otherwise.
macro_rules! dispatch_pair {
    ($lhs:expr, $rhs:expr, $a:ident, $b:ident => $body:expr) => {
        match ($lhs, $rhs) {
            (ArrayImpl::Bool($a), ArrayImpl::Bool($b)) => $body,
            (ArrayImpl::Int8($a), ArrayImpl::Int8($b)) => $body,
            (ArrayImpl::Int16($a), ArrayImpl::Int16($b)) => $body,
            (ArrayImpl::Int32($a), ArrayImpl::Int32($b)) => $body,
            (ArrayImpl::Int64($a), ArrayImpl::Int64($b)) => $body,
            (ArrayImpl::Int128($a), ArrayImpl::Int128($b)) => $body,
            (ArrayImpl::Float32($a), ArrayImpl::Float32($b)) => $body,
            (ArrayImpl::Float64($a), ArrayImpl::Float64($b)) => $body,
            (ArrayImpl::Utf8($a), ArrayImpl::Utf8($b)) => $body,
            (ArrayImpl::List($a), ArrayImpl::List($b)) => $body,
            (a, b) => panic!(
                "failed to append array: type mismatch ({} vs {})",
                a.type_name(),
                b.type_name()
            ),
        }
    };
}

impl ArrayImpl {
    /// Create an empty array able to hold values of `ty`.
    pub fn new_for(ty: &DataType, capacity: usize) -> Self {
        match ty {
            DataType::Bool => Self::Bool(BoolArray::with_capacity(capacity)),
            DataType::Int8 => Self::Int8(I8Array::with_capacity(capacity)),
            DataType::Int16 => Self::Int16(I16Array::with_capacity(capacity)),
            DataType::Int32 | DataType::Date | DataType::Decimal32(..) => {
                Self::Int32(I32Array::with_capacity(capacity))
            }
            DataType::Int64 | DataType::Datetime | DataType::Decimal64(..) => {
                Self::Int64(I64Array::with_capacity(capacity))
            }
            DataType::Int128 | DataType::Decimal128(..) => {
                Self::Int128(I128Array::with_capacity(capacity))
            }
            DataType::Float32 => Self::Float32(F32Array::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(F64Array::with_capacity(capacity)),
            DataType::Char(_) | DataType::Varchar(_) => {
                Self::Utf8(Utf8Array::with_capacity(capacity, 0))
            }
            DataType::Array(inner) => Self::List(ListArray::new(ArrayImpl::new_for(inner, 0))),
        }
    }

    /// Build an array of `ty` from scalars.
    pub fn from_values<'a>(ty: &DataType, values: impl IntoIterator<Item = &'a DataValue>) -> Self {
        let iter = values.into_iter();
        let mut array = Self::new_for(ty, iter.size_hint().0);
        for v in iter {
            array.push_value(v);
        }
        array
    }

    /// Get the type name of the array.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "BOOL",
            Self::Int8(_) => "INT8",
            Self::Int16(_) => "INT16",
            Self::Int32(_) => "INT32",
            Self::Int64(_) => "INT64",
            Self::Int128(_) => "INT128",
            Self::Float32(_) => "FLOAT32",
            Self::Float64(_) => "FLOAT64",
            Self::Utf8(_) => "UTF8",
            Self::List(_) => "LIST",
        }
    }

    /// Whether `value` can be pushed into this array.
    pub fn accepts(&self, value: &DataValue) -> bool {
        matches!(
            (self, value),
            (_, DataValue::Null)
                | (Self::Bool(_), DataValue::Bool(_))
                | (Self::Int8(_), DataValue::Int8(_))
                | (Self::Int16(_), DataValue::Int16(_))
                | (Self::Int32(_), DataValue::Int32(_))
                | (Self::Int64(_), DataValue::Int64(_))
                | (Self::Int128(_), DataValue::Int128(_))
                | (Self::Float32(_), DataValue::Float32(_))
                | (Self::Float64(_), DataValue::Float64(_))
                | (Self::Utf8(_), DataValue::String(_))
                | (Self::List(_), DataValue::List(_))
        )
    }

    /// Iterate over all values as scalars.
    pub fn values(&self) -> impl Iterator<Item = DataValue> + '_ {
        (0..self.len()).map(|i| self.value_at(i))
    }
}

impl Array for ArrayImpl {
    fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    fn is_null(&self, idx: usize) -> bool {
        dispatch!(self, a => a.is_null(idx))
    }

    fn has_null(&self) -> bool {
        dispatch!(self, a => a.has_null())
    }

    fn value_at(&self, idx: usize) -> DataValue {
        dispatch!(self, a => a.value_at(idx))
    }

    fn push_value(&mut self, value: &DataValue) {
        dispatch!(self, a => a.push_value(value))
    }

    fn append_nulls(&mut self, count: usize) {
        dispatch!(self, a => a.append_nulls(count))
    }

    fn append(&mut self, other: &Self, offset: usize, count: usize) {
        dispatch_pair!(self, other, a, b => a.append(b, offset, count))
    }

    fn append_repeated(&mut self, other: &Self, idx: usize, count: usize) {
        dispatch_pair!(self, other, a, b => a.append_repeated(b, idx, count))
    }

    fn append_selective(&mut self, other: &Self, indexes: &[u32]) {
        dispatch_pair!(self, other, a, b => a.append_selective(b, indexes))
    }

    fn filter_range(&mut self, selection: &[bool], from: usize, to: usize) -> usize {
        dispatch!(self, a => a.filter_range(selection, from, to))
    }

    fn resize(&mut self, len: usize) {
        dispatch!(self, a => a.resize(len))
    }

    fn reserve(&mut self, additional: usize) {
        dispatch!(self, a => a.reserve(additional))
    }

    fn clear(&mut self) {
        dispatch!(self, a => a.clear())
    }

    fn clone_empty(&self) -> Self {
        dispatch_wrap!(self, a => a.clone_empty())
    }

    fn memory_usage(&self) -> usize {
        dispatch!(self, a => a.memory_usage())
    }

    fn byte_size(&self, from: usize, count: usize) -> usize {
        dispatch!(self, a => a.byte_size(from, count))
    }
}

macro_rules! impl_into {
    ($x:ty, $y:ident) => {
        impl From<$x> for ArrayImpl {
            fn from(array: $x) -> Self {
                Self::$y(array)
            }
        }
    };
}

impl_into! { BoolArray, Bool }
impl_into! { I8Array, Int8 }
impl_into! { I16Array, Int16 }
impl_into! { I32Array, Int32 }
impl_into! { I64Array, Int64 }
impl_into! { I128Array, Int128 }
impl_into! { F32Array, Float32 }
impl_into! { F64Array, Float64 }
impl_into! { Utf8Array, Utf8 }
impl_into! { ListArray, List }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_for_uses_delegate() {
        assert_eq!(
            ArrayImpl::new_for(&DataType::Decimal64(10, 2), 0).type_name(),
            "INT64"
        );
        assert_eq!(ArrayImpl::new_for(&DataType::Date, 0).type_name(), "INT32");
        assert_eq!(
            ArrayImpl::new_for(&DataType::Array(Box::new(DataType::Int8)), 0).type_name(),
            "LIST"
        );
    }

    #[test]
    #[should_panic(expected = "type mismatch")]
    fn append_mismatch_panics() {
        let mut a = ArrayImpl::new_for(&DataType::Int32, 0);
        let b = ArrayImpl::new_for(&DataType::Int64, 0);
        a.append(&b, 0, 0);
    }

    #[test]
    fn from_values() {
        let values = [DataValue::Int32(1), DataValue::Null, DataValue::Int32(3)];
        let array = ArrayImpl::from_values(&DataType::Int32, &values);
        assert_eq!(array.len(), 3);
        assert!(array.is_null(1));
        assert_eq!(array.values().collect::<Vec<_>>(), values);
    }
}
