// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::fmt::Debug;

use risinglight_proto::segment::CompressionTypePb;

use crate::storage::{StorageResult, TracedStorageError};

/// A block compression algorithm applied to page bodies.
pub trait CompressionCodec: Send + Sync + Debug {
    fn compression_type(&self) -> CompressionTypePb;

    fn compress(&self, input: &[u8]) -> Vec<u8>;

    fn decompress(&self, input: &[u8], uncompressed_size: usize) -> StorageResult<Vec<u8>>;
}

#[derive(Debug)]
pub struct Lz4Codec;

static LZ4_CODEC: Lz4Codec = Lz4Codec;

impl CompressionCodec for Lz4Codec {
    fn compression_type(&self) -> CompressionTypePb {
        CompressionTypePb::Lz4
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(input)
    }

    fn decompress(&self, input: &[u8], uncompressed_size: usize) -> StorageResult<Vec<u8>> {
        lz4_flex::block::decompress(input, uncompressed_size)
            .map_err(|e| TracedStorageError::corruption(format!("failed to decompress lz4 page: {e}")))
    }
}

/// The codec of a compression type, or `None` for uncompressed pages.
pub fn get_block_compression_codec(
    ty: CompressionTypePb,
) -> StorageResult<Option<&'static dyn CompressionCodec>> {
    match ty {
        CompressionTypePb::UnknownCompression | CompressionTypePb::NoCompression => Ok(None),
        CompressionTypePb::Lz4 => Ok(Some(&LZ4_CODEC)),
        other => Err(TracedStorageError::not_supported(format!(
            "compression type {other:?}"
        ))),
    }
}
