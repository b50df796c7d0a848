// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::fmt::Debug;

use bytes::{Buf, BufMut};

use super::{DataValue, F32, F64};

/// A primitive value stored in fixed-width little-endian form.
pub trait NativeType:
    Copy + Clone + Default + Debug + PartialEq + Send + Sync + 'static
{
    /// Width of each element in bytes.
    const WIDTH: usize;

    /// Encode current primitive data to the end of a buffer.
    fn encode(&self, buffer: &mut impl BufMut);

    /// Decode a value from the front of a buffer.
    fn decode(buffer: &mut impl Buf) -> Self;

    fn to_value(self) -> DataValue;

    /// Extracts the value if `value` holds this physical type.
    fn from_value(value: &DataValue) -> Option<Self>;
}

macro_rules! impl_native {
    ($($t:ty, $variant:ident, $put:ident, $get:ident);* $(;)?) => {
        $(
            impl NativeType for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn encode(&self, buffer: &mut impl BufMut) {
                    buffer.$put(*self);
                }

                fn decode(buffer: &mut impl Buf) -> Self {
                    buffer.$get()
                }

                fn to_value(self) -> DataValue {
                    DataValue::$variant(self)
                }

                fn from_value(value: &DataValue) -> Option<Self> {
                    match value {
                        DataValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_native! {
    i8, Int8, put_i8, get_i8;
    i16, Int16, put_i16_le, get_i16_le;
    i32, Int32, put_i32_le, get_i32_le;
    i64, Int64, put_i64_le, get_i64_le;
    i128, Int128, put_i128_le, get_i128_le;
}

impl NativeType for bool {
    const WIDTH: usize = std::mem::size_of::<u8>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u8(*self as u8)
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_u8() != 0
    }

    fn to_value(self) -> DataValue {
        DataValue::Bool(self)
    }

    fn from_value(value: &DataValue) -> Option<Self> {
        match value {
            DataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl NativeType for f32 {
    const WIDTH: usize = std::mem::size_of::<f32>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_f32_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_f32_le()
    }

    fn to_value(self) -> DataValue {
        DataValue::Float32(F32::from(self))
    }

    fn from_value(value: &DataValue) -> Option<Self> {
        match value {
            DataValue::Float32(v) => Some(v.0),
            _ => None,
        }
    }
}

impl NativeType for f64 {
    const WIDTH: usize = std::mem::size_of::<f64>();

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_f64_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_f64_le()
    }

    fn to_value(self) -> DataValue {
        DataValue::Float64(F64::from(self))
    }

    fn from_value(value: &DataValue) -> Option<Self> {
        match value {
            DataValue::Float64(v) => Some(v.0),
            _ => None,
        }
    }
}
