// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Value encodings of data pages.
//!
//! A data page body is `| values | null map |`. The null map is a bitmap with
//! one bit per row (set = null) and is absent for non-nullable columns. Null
//! rows still occupy a placeholder in the value section.
//!
//! * plain, fixed-width types: one little-endian value per row.
//! * plain, strings: `| len (u32) | bytes |` per row.
//! * dictionary: one `u32` code per row into the column's dictionary page.

use bitvec::prelude::*;
use bytes::{Buf, BufMut, Bytes};
use risinglight_proto::segment::{DataPageFooterPb, EncodingTypePb};

use crate::array::{Array, ArrayImpl, PrimitiveArray, Utf8Array};
use crate::storage::{StorageResult, TracedStorageError};
use crate::types::{DataType, NativeType};

/// Whether a column of `ty` can be stored with `encoding`.
pub fn check_encoding(ty: &DataType, encoding: EncodingTypePb) -> StorageResult<()> {
    match encoding {
        EncodingTypePb::DefaultEncoding | EncodingTypePb::PlainEncoding => Ok(()),
        EncodingTypePb::DictEncoding if ty.is_string() => Ok(()),
        other => Err(TracedStorageError::not_supported(format!(
            "encoding {other:?} for type {ty}"
        ))),
    }
}

/// Decode the body of a data page into an array of `ty`.
pub fn decode_data_page(
    ty: &DataType,
    encoding: EncodingTypePb,
    body: &[u8],
    footer: &DataPageFooterPb,
    dict: Option<&Utf8Array>,
) -> StorageResult<ArrayImpl> {
    let num_values = footer.num_values as usize;
    let nullmap_size = footer.nullmap_size as usize;
    if nullmap_size > body.len() {
        return Err(TracedStorageError::corruption(format!(
            "null map size {nullmap_size} exceeds page body size {}",
            body.len()
        )));
    }
    let (values, nullmap) = body.split_at(body.len() - nullmap_size);
    let nulls = if nullmap_size == 0 {
        None
    } else {
        if nullmap.len() * 8 < num_values {
            return Err(TracedStorageError::corruption(format!(
                "null map of {} bytes cannot hold {num_values} rows",
                nullmap.len()
            )));
        }
        Some(nullmap.view_bits::<Lsb0>())
    };
    match encoding {
        EncodingTypePb::DictEncoding => {
            let dict = dict.ok_or_else(|| {
                TracedStorageError::corruption("dictionary encoded page without dictionary")
            })?;
            decode_dict_values(values, num_values, nulls, dict)
        }
        _ => decode_plain_values(ty, values, num_values, nulls),
    }
}

/// Decode `num_values` plain-encoded values of `ty`.
pub fn decode_plain_values(
    ty: &DataType,
    data: &[u8],
    num_values: usize,
    nulls: Option<&BitSlice<u8, Lsb0>>,
) -> StorageResult<ArrayImpl> {
    let mut array = ArrayImpl::new_for(ty, num_values);
    match &mut array {
        ArrayImpl::Bool(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Int8(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Int16(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Int32(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Int64(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Int128(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Float32(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Float64(a) => decode_fixed(a, data, num_values, nulls)?,
        ArrayImpl::Utf8(a) => decode_binary(a, data, num_values, nulls)?,
        ArrayImpl::List(_) => {
            return Err(TracedStorageError::not_supported(format!(
                "plain pages of type {ty}"
            )))
        }
    }
    Ok(array)
}

fn is_null(nulls: Option<&BitSlice<u8, Lsb0>>, idx: usize) -> bool {
    nulls.map_or(false, |n| n[idx])
}

fn decode_fixed<T: NativeType>(
    array: &mut PrimitiveArray<T>,
    mut data: &[u8],
    num_values: usize,
    nulls: Option<&BitSlice<u8, Lsb0>>,
) -> StorageResult<()> {
    if data.len() != num_values * T::WIDTH {
        return Err(TracedStorageError::corruption(format!(
            "expect {} bytes for {num_values} values, got {}",
            num_values * T::WIDTH,
            data.len()
        )));
    }
    for i in 0..num_values {
        let v = T::decode(&mut data);
        array.push((!is_null(nulls, i)).then_some(v));
    }
    Ok(())
}

fn decode_binary(
    array: &mut Utf8Array,
    mut data: &[u8],
    num_values: usize,
    nulls: Option<&BitSlice<u8, Lsb0>>,
) -> StorageResult<()> {
    for i in 0..num_values {
        let value = take_length_prefixed(&mut data)?;
        if is_null(nulls, i) {
            array.push(None);
        } else {
            let s = std::str::from_utf8(value)
                .map_err(|e| TracedStorageError::corruption(format!("invalid utf-8 value: {e}")))?;
            array.push(Some(s));
        }
    }
    if data.has_remaining() {
        return Err(TracedStorageError::corruption(format!(
            "{} trailing bytes after {num_values} values",
            data.len()
        )));
    }
    Ok(())
}

fn decode_dict_values(
    mut data: &[u8],
    num_values: usize,
    nulls: Option<&BitSlice<u8, Lsb0>>,
    dict: &Utf8Array,
) -> StorageResult<ArrayImpl> {
    if data.len() != num_values * 4 {
        return Err(TracedStorageError::corruption(format!(
            "expect {} bytes of dictionary codes, got {}",
            num_values * 4,
            data.len()
        )));
    }
    let mut array = Utf8Array::with_capacity(num_values, 0);
    for i in 0..num_values {
        let code = data.get_u32_le() as usize;
        if is_null(nulls, i) {
            array.push(None);
            continue;
        }
        if code >= dict.len() {
            return Err(TracedStorageError::corruption(format!(
                "dictionary code {code} out of range {}",
                dict.len()
            )));
        }
        array.push(dict.get(code));
    }
    Ok(array.into())
}

/// Split one `| len (u32) | bytes |` item off the front of `data`.
pub fn take_length_prefixed<'a>(data: &mut &'a [u8]) -> StorageResult<&'a [u8]> {
    if data.len() < 4 {
        return Err(TracedStorageError::corruption("truncated length prefix"));
    }
    let len = data.get_u32_le() as usize;
    if data.len() < len {
        return Err(TracedStorageError::corruption(format!(
            "truncated value: need {len} bytes, {} left",
            data.len()
        )));
    }
    let (value, rest) = data.split_at(len);
    *data = rest;
    Ok(value)
}

/// Decode exactly `count` length-prefixed items from `body`.
pub fn decode_length_prefixed(body: &Bytes, count: usize) -> StorageResult<Vec<Bytes>> {
    let mut data = &body[..];
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let item = take_length_prefixed(&mut data)?;
        items.push(body.slice_ref(item));
    }
    if !data.is_empty() {
        return Err(TracedStorageError::corruption(format!(
            "{} trailing bytes after {count} items",
            data.len()
        )));
    }
    Ok(items)
}

pub fn encode_length_prefixed(item: &[u8], buf: &mut Vec<u8>) {
    buf.put_u32_le(item.len() as u32);
    buf.extend_from_slice(item);
}

/// Plain-encode every value of `array`, nulls as placeholders.
pub fn encode_plain_values(array: &ArrayImpl, buf: &mut Vec<u8>) {
    fn fixed<T: NativeType>(a: &PrimitiveArray<T>, buf: &mut Vec<u8>) {
        for v in a.raw_data() {
            v.encode(buf);
        }
    }
    match array {
        ArrayImpl::Bool(a) => fixed(a, buf),
        ArrayImpl::Int8(a) => fixed(a, buf),
        ArrayImpl::Int16(a) => fixed(a, buf),
        ArrayImpl::Int32(a) => fixed(a, buf),
        ArrayImpl::Int64(a) => fixed(a, buf),
        ArrayImpl::Int128(a) => fixed(a, buf),
        ArrayImpl::Float32(a) => fixed(a, buf),
        ArrayImpl::Float64(a) => fixed(a, buf),
        ArrayImpl::Utf8(a) => {
            for v in a.iter() {
                encode_length_prefixed(v.unwrap_or_default().as_bytes(), buf);
            }
        }
        ArrayImpl::List(_) => panic!("list arrays are stored as child columns"),
    }
}

/// The null map of `array`: one bit per row, set for nulls.
pub fn encode_null_map(array: &ArrayImpl) -> Vec<u8> {
    let mut nulls: BitVec<u8, Lsb0> = BitVec::with_capacity(array.len());
    for i in 0..array.len() {
        nulls.push(array.is_null(i));
    }
    nulls.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataValue;

    fn page_of(array: &ArrayImpl, nullable: bool) -> (Vec<u8>, DataPageFooterPb) {
        let mut body = vec![];
        encode_plain_values(array, &mut body);
        let mut nullmap_size = 0;
        if nullable {
            let nulls = encode_null_map(array);
            nullmap_size = nulls.len() as u32;
            body.extend_from_slice(&nulls);
        }
        let footer = DataPageFooterPb {
            first_ordinal: 0,
            num_values: array.len() as u64,
            nullmap_size,
        };
        (body, footer)
    }

    #[test]
    fn nullable_strings() {
        let values = [
            DataValue::String("ab".into()),
            DataValue::Null,
            DataValue::String("".into()),
        ];
        let array = ArrayImpl::from_values(&DataType::Varchar(10), &values);
        let (body, footer) = page_of(&array, true);
        let decoded = decode_data_page(
            &DataType::Varchar(10),
            EncodingTypePb::PlainEncoding,
            &body,
            &footer,
            None,
        )
        .unwrap();
        assert_eq!(decoded, array);
    }

    #[test]
    fn truncated_values_are_corruption() {
        let array: ArrayImpl = (0..10).collect::<PrimitiveArray<i64>>().into();
        let (body, footer) = page_of(&array, false);
        let err = decode_data_page(
            &DataType::Int64,
            EncodingTypePb::PlainEncoding,
            &body[..body.len() - 3],
            &footer,
            None,
        )
        .unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn dictionary_codes() {
        let dict: Utf8Array = ["x", "y"].into_iter().collect();
        let mut body = vec![];
        for code in [1u32, 0, 1] {
            body.put_u32_le(code);
        }
        let footer = DataPageFooterPb {
            first_ordinal: 0,
            num_values: 3,
            nullmap_size: 0,
        };
        let decoded = decode_data_page(
            &DataType::Char(1),
            EncodingTypePb::DictEncoding,
            &body,
            &footer,
            Some(&dict),
        )
        .unwrap();
        assert_eq!(decoded.value_at(0), DataValue::String("y".into()));
        assert_eq!(decoded.value_at(1), DataValue::String("x".into()));

        body.put_u32_le(7);
        let footer = DataPageFooterPb {
            num_values: 4,
            ..footer
        };
        assert!(decode_data_page(
            &DataType::Char(1),
            EncodingTypePb::DictEncoding,
            &body,
            &footer,
            Some(&dict),
        )
        .is_err());
    }

    #[test]
    fn unsupported_encoding() {
        assert!(check_encoding(&DataType::Int32, EncodingTypePb::DictEncoding).is_err());
        assert!(check_encoding(&DataType::Varchar(3), EncodingTypePb::DictEncoding).is_ok());
        assert!(check_encoding(&DataType::Int32, EncodingTypePb::RleEncoding)
            .unwrap_err()
            .is_not_supported());
    }
}
