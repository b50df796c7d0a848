// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! The short key index samples the sort key prefix of the first row of every block
//! of `num_rows_per_block` rows.
//!
//! ```plain
//! | key 0 | key 1 | ... | key n-1 | offset 0 (u32) | ... | offset n-1 (u32) |
//! ```
//!
//! Keys are memcomparable: comparing encoded keys byte-wise orders them like the rows.

use bytes::{Buf, BufMut, Bytes};
use risinglight_proto::segment::PageTypePb;

use crate::storage::mem_tracker::MemUsage;
use crate::storage::{Page, Range, StorageResult, TracedStorageError};
use crate::types::{DataValue, RowId};

const NULL_FLAG: u8 = 0x00;
const NOT_NULL_FLAG: u8 = 0x01;

/// Append the memcomparable encoding of a key prefix to `buf`.
pub fn encode_short_key(values: &[DataValue], buf: &mut Vec<u8>) {
    for value in values {
        if value.is_null() {
            buf.put_u8(NULL_FLAG);
            continue;
        }
        buf.put_u8(NOT_NULL_FLAG);
        match value {
            DataValue::Null => unreachable!(),
            DataValue::Bool(v) => buf.put_u8(*v as u8),
            DataValue::Int8(v) => buf.put_u8((*v as u8) ^ 0x80),
            DataValue::Int16(v) => buf.put_u16((*v as u16) ^ (1 << 15)),
            DataValue::Int32(v) => buf.put_u32((*v as u32) ^ (1 << 31)),
            DataValue::Int64(v) => buf.put_u64((*v as u64) ^ (1 << 63)),
            DataValue::Int128(v) => buf.put_u128((*v as u128) ^ (1 << 127)),
            DataValue::Float32(v) => {
                let bits = v.0.to_bits();
                let bits = if bits >> 31 == 1 { !bits } else { bits | (1 << 31) };
                buf.put_u32(bits);
            }
            DataValue::Float64(v) => {
                let bits = v.0.to_bits();
                let bits = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                buf.put_u64(bits);
            }
            DataValue::String(s) => {
                for b in s.as_bytes() {
                    buf.put_u8(*b);
                    if *b == 0 {
                        buf.put_u8(0xff);
                    }
                }
                buf.put_slice(&[0x00, 0x01]);
            }
            DataValue::List(items) => encode_short_key(items, buf),
        }
    }
}

/// Decoded short key index page.
#[derive(Debug, Clone)]
pub struct ShortKeyIndexDecoder {
    keys: Bytes,
    offsets: Vec<u32>,
    num_rows_per_block: u32,
    num_segment_rows: u32,
}

impl ShortKeyIndexDecoder {
    pub fn parse(page: &Page) -> StorageResult<Self> {
        if page.page_type() != PageTypePb::ShortKeyPage {
            return Err(TracedStorageError::corruption(format!(
                "expect short key page, got {:?}",
                page.page_type()
            )));
        }
        let footer = page.footer.short_key_page_footer.as_ref().ok_or_else(|| {
            TracedStorageError::corruption("short key page without footer")
        })?;
        let key_bytes = footer.key_bytes as usize;
        let num_items = footer.num_items as usize;
        if footer.offset_bytes as usize != num_items * 4
            || key_bytes + footer.offset_bytes as usize != page.body.len()
            || footer.num_rows_per_block == 0
        {
            return Err(TracedStorageError::corruption(format!(
                "invalid short key page: {} bytes, footer {footer:?}",
                page.body.len()
            )));
        }
        let keys = page.body.slice(..key_bytes);
        let mut data = &page.body[key_bytes..];
        let mut offsets = Vec::with_capacity(num_items + 1);
        for _ in 0..num_items {
            let offset = data.get_u32_le();
            if offset as usize > key_bytes || offsets.last().map_or(false, |prev| *prev > offset) {
                return Err(TracedStorageError::corruption(format!(
                    "invalid short key offset {offset}"
                )));
            }
            offsets.push(offset);
        }
        offsets.push(key_bytes as u32);
        Ok(Self {
            keys,
            offsets,
            num_rows_per_block: footer.num_rows_per_block,
            num_segment_rows: footer.num_segment_rows,
        })
    }

    pub fn num_items(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn key(&self, idx: usize) -> &[u8] {
        &self.keys[self.offsets[idx] as usize..self.offsets[idx + 1] as usize]
    }

    pub fn num_rows_per_block(&self) -> u32 {
        self.num_rows_per_block
    }

    /// First item whose key is not less than `key`.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.partition(|item| item < key)
    }

    /// First item whose key is greater than `key` and does not extend it.
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        self.partition(|item| item <= key || item.starts_with(key))
    }

    fn partition(&self, pred: impl Fn(&[u8]) -> bool) -> usize {
        let (mut lo, mut hi) = (0, self.num_items());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(self.key(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Rows that may hold keys within `[lower, upper]`. A missing bound is unbounded.
    pub fn row_range(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Range {
        let begin_block = lower.map_or(0, |k| self.lower_bound(k).saturating_sub(1));
        let end_block = upper.map_or(self.num_items(), |k| self.upper_bound(k));
        let to_row = |block: usize| {
            (block as u64 * self.num_rows_per_block as u64).min(self.num_segment_rows as u64)
                as RowId
        };
        let (begin, end) = (to_row(begin_block), to_row(end_block));
        if end_block == self.num_items() {
            Range::new(begin, self.num_segment_rows.max(begin))
        } else {
            Range::new(begin, end.max(begin))
        }
    }
}

impl MemUsage for ShortKeyIndexDecoder {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.keys.len() + self.offsets.capacity() * 4
    }
}

/// Body of a short key page over the given keys, and its key region size.
pub fn encode_short_key_page(keys: &[Vec<u8>]) -> (Vec<u8>, u32) {
    let mut body = vec![];
    let mut offsets = Vec::with_capacity(keys.len());
    for key in keys {
        offsets.push(body.len() as u32);
        body.extend_from_slice(key);
    }
    let key_bytes = body.len() as u32;
    for offset in offsets {
        body.put_u32_le(offset);
    }
    (body, key_bytes)
}

#[cfg(test)]
mod tests {
    use risinglight_proto::segment::{PageFooterPb, ShortKeyFooterPb};
    use test_case::test_case;

    use super::*;

    fn key(v: i32) -> Vec<u8> {
        let mut buf = vec![];
        encode_short_key(&[DataValue::Int32(v)], &mut buf);
        buf
    }

    /// Blocks of 10 rows whose first keys are 0, 10, 10, 30.
    fn decoder() -> ShortKeyIndexDecoder {
        let keys = [0, 10, 10, 30].map(key);
        let (body, key_bytes) = encode_short_key_page(&keys);
        let page = Page {
            footer: PageFooterPb {
                r#type: PageTypePb::ShortKeyPage as i32,
                uncompressed_size: body.len() as u32,
                short_key_page_footer: Some(ShortKeyFooterPb {
                    num_items: 4,
                    key_bytes,
                    offset_bytes: 16,
                    segment_id: 0,
                    num_rows_per_block: 10,
                    num_segment_rows: 35,
                }),
                ..Default::default()
            },
            body: body.into(),
        };
        ShortKeyIndexDecoder::parse(&page).unwrap()
    }

    #[test]
    fn keys_are_memcomparable() {
        assert!(key(-1) < key(0));
        assert!(key(0) < key(i32::MAX));
        let s = |s: &str| {
            let mut buf = vec![];
            encode_short_key(&[DataValue::String(s.into())], &mut buf);
            buf
        };
        assert!(s("a") < s("ab"));
        assert!(s("a\0") < s("ab"));
        let mut null = vec![];
        encode_short_key(&[DataValue::Null], &mut null);
        assert!(null < key(i32::MIN));
    }

    #[test_case(Some(10), Some(10), 0, 30; "equal key spans duplicated blocks")]
    #[test_case(Some(11), None, 20, 35; "lower bound only")]
    #[test_case(None, Some(5), 0, 10; "upper bound only")]
    #[test_case(Some(31), Some(40), 30, 35; "past last key")]
    #[test_case(Some(-5), Some(-1), 0, 0; "before first key")]
    fn row_ranges(lower: Option<i32>, upper: Option<i32>, begin: RowId, end: RowId) {
        let decoder = decoder();
        let (lower, upper) = (lower.map(key), upper.map(key));
        let range = decoder.row_range(lower.as_deref(), upper.as_deref());
        assert_eq!(range, Range::new(begin, end));
    }
}
