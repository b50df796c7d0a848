// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::fmt;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::Serialize;

use super::DataType;

/// A wrapper around floats providing implementations of `Eq`, `Ord`, and `Hash`.
pub type F32 = OrderedFloat<f32>;
pub type F64 = OrderedFloat<f64>;

/// A scalar value in its physical representation.
///
/// Decimals, dates and datetimes are carried by their integer delegate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DataValue {
    // NOTE: Null comes first.
    // => NULL is less than any non-NULL values
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Float32(F32),
    Float64(F64),
    String(String),
    List(Vec<DataValue>),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Int128(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::List(v) => write!(f, "[{}]", v.iter().join(",")),
        }
    }
}

impl DataValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn as_i128(&self) -> Option<i128> {
        Some(match self {
            Self::Int8(v) => *v as i128,
            Self::Int16(v) => *v as i128,
            Self::Int32(v) => *v as i128,
            Self::Int64(v) => *v as i128,
            Self::Int128(v) => *v,
            _ => return None,
        })
    }

    /// Converts the value to the physical representation of `ty`.
    ///
    /// Returns `None` if the value does not fit the target.
    pub fn cast_to(&self, ty: &DataType) -> Option<DataValue> {
        use DataType as T;
        if self.is_null() {
            return Some(Self::Null);
        }
        let int = self.as_i128();
        Some(match (self, ty.delegate()) {
            (Self::Bool(v), T::Bool) => Self::Bool(*v),
            (_, T::Int8) => Self::Int8(i8::try_from(int?).ok()?),
            (_, T::Int16) => Self::Int16(i16::try_from(int?).ok()?),
            (_, T::Int32 | T::Date) => Self::Int32(i32::try_from(int?).ok()?),
            (_, T::Int64 | T::Datetime) => Self::Int64(i64::try_from(int?).ok()?),
            (_, T::Int128) => Self::Int128(int?),
            (Self::Float32(v), T::Float32) => Self::Float32(*v),
            (Self::Float32(v), T::Float64) => Self::Float64(F64::from(v.0 as f64)),
            (Self::Float64(v), T::Float64) => Self::Float64(*v),
            (Self::Float64(v), T::Float32) => {
                let narrowed = v.0 as f32;
                if narrowed as f64 != v.0 {
                    return None;
                }
                Self::Float32(F32::from(narrowed))
            }
            (Self::String(s), T::Char(_) | T::Varchar(_)) => Self::String(s.clone()),
            (Self::List(items), T::Array(inner)) => Self::List(
                items
                    .iter()
                    .map(|item| item.cast_to(&inner))
                    .collect::<Option<Vec<_>>>()?,
            ),
            _ => return None,
        })
    }

    /// Appends the bytes hashed into bloom filters for this value.
    pub fn write_hash_key(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Null => {}
            Self::Bool(v) => buf.push(*v as u8),
            Self::Int8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Int128(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Self::Float32(v) => buf.extend_from_slice(&v.0.to_le_bytes()),
            Self::Float64(v) => buf.extend_from_slice(&v.0.to_le_bytes()),
            Self::String(v) => buf.extend_from_slice(v.as_bytes()),
            Self::List(items) => {
                for item in items {
                    item.write_hash_key(buf);
                }
            }
        }
    }
}
