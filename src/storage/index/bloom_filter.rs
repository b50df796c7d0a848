// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::hash::Hasher;

use bitvec::prelude::*;
use bytes::Bytes;
use risinglight_proto::segment::{BloomFilterIndexPb, HashStrategyPb, PageTypePb};
use siphasher::sip::SipHasher13;

use super::indexed_column_page;
use crate::storage::mem_tracker::MemUsage;
use crate::storage::segment::SegmentFile;
use crate::storage::{decode_length_prefixed, encode_length_prefixed, StorageResult, TracedStorageError};
use crate::types::DataValue;

const HASH_KEY0: u64 = 0x5b3e_9c1d_27f4_a860;
const HASH_KEY1: u64 = 0x0d1f_6a2b_8c47_e935;

fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(HASH_KEY0, HASH_KEY1);
    hasher.write(key);
    hasher.finish()
}

/// Bit positions probed for a hash, by double hashing.
fn probes(hash: u64, num_hashes: u32, num_bits: usize) -> impl Iterator<Item = usize> {
    let h1 = hash & 0xffff_ffff;
    let h2 = hash >> 32;
    (0..num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits as u64) as usize)
}

/// A bloom filter of one data page.
///
/// Stored as the bit array followed by one byte telling whether the page has nulls.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    data: Bytes,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn from_bytes(data: Bytes, num_hashes: u32) -> StorageResult<Self> {
        if data.len() < 2 || num_hashes == 0 {
            return Err(TracedStorageError::corruption(format!(
                "invalid bloom filter: {} bytes, {num_hashes} hashes",
                data.len()
            )));
        }
        Ok(Self { data, num_hashes })
    }

    fn bits(&self) -> &BitSlice<u8, Lsb0> {
        self.data[..self.data.len() - 1].view_bits::<Lsb0>()
    }

    pub fn has_null(&self) -> bool {
        self.data[self.data.len() - 1] != 0
    }

    /// Whether `key` may be in the page.
    pub fn test_bytes(&self, key: &[u8]) -> bool {
        let bits = self.bits();
        probes(hash_key(key), self.num_hashes, bits.len()).all(|i| bits[i])
    }

    pub fn test_value(&self, value: &DataValue) -> bool {
        if value.is_null() {
            return self.has_null();
        }
        let mut key = vec![];
        value.write_hash_key(&mut key);
        self.test_bytes(&key)
    }
}

/// Builds the bloom filter of a page.
pub struct BloomFilterBuilder {
    bits: BitVec<u8, Lsb0>,
    num_hashes: u32,
    has_null: bool,
}

impl BloomFilterBuilder {
    /// Size a filter for `expected_items` distinct values at false positive rate `fpp`.
    pub fn new(expected_items: usize, fpp: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * fpp.ln() / (ln2 * ln2)).ceil() as usize).max(64);
        let num_bits = num_bits.next_multiple_of(8);
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        Self {
            bits: bitvec![u8, Lsb0; 0; num_bits],
            num_hashes,
            has_null: false,
        }
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn add_value(&mut self, value: &DataValue) {
        if value.is_null() {
            self.has_null = true;
            return;
        }
        let mut key = vec![];
        value.write_hash_key(&mut key);
        let num_bits = self.bits.len();
        for i in probes(hash_key(&key), self.num_hashes, num_bits) {
            self.bits.set(i, true);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        let mut data = self.bits.into_vec();
        data.push(self.has_null as u8);
        data
    }
}

/// Bloom filters of every data page of a column.
#[derive(Debug, Clone)]
pub struct BloomFilterIndexReader {
    filters: Vec<Bytes>,
    num_hashes: u32,
}

impl BloomFilterIndexReader {
    pub fn load(file: &SegmentFile, meta: &BloomFilterIndexPb) -> StorageResult<Self> {
        let strategy = HashStrategyPb::try_from(meta.hash_strategy).map_err(|_| {
            TracedStorageError::not_supported(format!(
                "bloom filter hash strategy {}",
                meta.hash_strategy
            ))
        })?;
        debug_assert_eq!(strategy, HashStrategyPb::SipHash13);
        let pointer = indexed_column_page(meta.bloom_filter.as_ref(), "bloom filter")?;
        let num_values = meta.bloom_filter.as_ref().map_or(0, |m| m.num_values as usize);
        let page = file.read_index_page(pointer, PageTypePb::IndexPage)?;
        let filters = decode_length_prefixed(&page.body, num_values)?;
        Ok(Self {
            filters,
            num_hashes: meta.num_hash_functions,
        })
    }

    pub fn num_pages(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> BloomFilterIndexIterator<'_> {
        BloomFilterIndexIterator { reader: self }
    }
}

impl MemUsage for BloomFilterIndexReader {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.filters.iter().map(|f| f.len()).sum::<usize>()
    }
}

/// Random access to the filter of each page.
pub struct BloomFilterIndexIterator<'a> {
    reader: &'a BloomFilterIndexReader,
}

impl BloomFilterIndexIterator<'_> {
    pub fn read_bloom_filter(&self, page_id: usize) -> StorageResult<BloomFilter> {
        let data = self.reader.filters.get(page_id).ok_or_else(|| {
            TracedStorageError::corruption(format!(
                "bloom filter of page {page_id} missing, {} pages indexed",
                self.reader.filters.len()
            ))
        })?;
        BloomFilter::from_bytes(data.clone(), self.reader.num_hashes)
    }
}

/// Body of a bloom filter index page.
pub fn encode_bloom_filters(filters: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![];
    for f in filters {
        encode_length_prefixed(f, &mut buf);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut builder = BloomFilterBuilder::new(100, 0.05);
        for i in 0..100 {
            builder.add_value(&DataValue::Int64(i * 7));
        }
        let num_hashes = builder.num_hashes();
        let filter = BloomFilter::from_bytes(Bytes::from(builder.finish()), num_hashes).unwrap();
        for i in 0..100 {
            assert!(filter.test_value(&DataValue::Int64(i * 7)));
        }
        let false_positives = (0..1000)
            .filter(|i| filter.test_value(&DataValue::Int64(100_000 + i)))
            .count();
        assert!(false_positives < 200, "{false_positives}");
        assert!(!filter.has_null());
        assert!(!filter.test_value(&DataValue::Null));
    }

    #[test]
    fn null_flag() {
        let mut builder = BloomFilterBuilder::new(4, 0.05);
        builder.add_value(&DataValue::Null);
        builder.add_value(&DataValue::String("a".into()));
        let num_hashes = builder.num_hashes();
        let filter = BloomFilter::from_bytes(Bytes::from(builder.finish()), num_hashes).unwrap();
        assert!(filter.test_value(&DataValue::Null));
        assert!(filter.test_value(&DataValue::String("a".into())));
    }
}
