// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Pages are the unit of I/O inside a segment file.
//!
//! Every page is laid out as
//!
//! ```plain
//! | body (maybe compressed) | PageFooterPb | footer size (u32) | crc32c (u32) |
//! ```
//!
//! The checksum covers everything before it. Integers are little-endian.

mod cache;
mod codec;
mod encoding;

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};
use prost::Message;
use risinglight_proto::segment::{PageFooterPb, PagePointerPb, PageTypePb};

pub use self::cache::*;
pub use self::codec::*;
pub use self::encoding::*;
use super::mem_tracker::{message_mem_usage, MemUsage};
use super::{ReadableBlock, ReaderStatistics, StorageResult, TracedStorageError};

/// Size of footer length plus checksum at the end of a page.
pub const PAGE_TRAILER_SIZE: usize = 8;

/// Location of a page inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PagePointer {
    pub offset: u64,
    pub size: u32,
}

impl PagePointer {
    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn to_pb(self) -> PagePointerPb {
        PagePointerPb {
            offset: self.offset,
            size: self.size,
        }
    }
}

impl From<&PagePointerPb> for PagePointer {
    fn from(pb: &PagePointerPb) -> Self {
        Self::new(pb.offset, pb.size)
    }
}

impl MemUsage for PagePointer {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// A decompressed page.
#[derive(Debug, Clone)]
pub struct Page {
    pub body: Bytes,
    pub footer: PageFooterPb,
}

impl Page {
    pub fn page_type(&self) -> PageTypePb {
        PageTypePb::try_from(self.footer.r#type).unwrap_or(PageTypePb::UnknownPageType)
    }

    /// Fails with `Corruption` unless the page has type `expected`.
    pub fn expect_type(&self, expected: PageTypePb, file: &str) -> StorageResult<()> {
        let actual = self.page_type();
        if actual != expected {
            return Err(TracedStorageError::corruption(format!(
                "Bad page in {file}: expect {expected:?} but got {actual:?}"
            )));
        }
        Ok(())
    }
}

impl MemUsage for Page {
    fn mem_usage(&self) -> usize {
        self.body.len() + message_mem_usage(&self.footer)
    }
}

pub struct PageReadOptions<'a> {
    pub block: &'a dyn ReadableBlock,
    pub page_pointer: PagePointer,
    pub codec: Option<&'static dyn CompressionCodec>,
    pub verify_checksum: bool,
    pub use_page_cache: bool,
    pub page_cache: Option<&'a PageCache>,
    pub stats: Option<&'a ReaderStatistics>,
}

/// Read a page, verify its checksum, parse its footer and decompress its body.
pub fn read_and_decompress_page(opts: &PageReadOptions<'_>) -> StorageResult<Arc<Page>> {
    let path = opts.block.path();
    let pointer = opts.page_pointer;
    let cache = opts.page_cache.filter(|_| opts.use_page_cache);
    if let Some(page) = cache.and_then(|c| c.lookup(path, pointer.offset)) {
        if let Some(stats) = opts.stats {
            ReaderStatistics::add(&stats.cached_pages_read, 1);
        }
        return Ok(page);
    }

    let page_size = pointer.size as usize;
    if page_size < PAGE_TRAILER_SIZE {
        return Err(TracedStorageError::corruption(format!(
            "Bad page in {path}: page size {page_size} at offset {} is too small",
            pointer.offset
        )));
    }
    let data = opts.block.read_bytes(pointer.offset, page_size)?;
    if let Some(stats) = opts.stats {
        ReaderStatistics::add(&stats.pages_read, 1);
        ReaderStatistics::add(&stats.bytes_read, page_size as u64);
    }

    let mut trailer = &data[page_size - PAGE_TRAILER_SIZE..];
    let footer_size = trailer.get_u32_le() as usize;
    let expected = trailer.get_u32_le();
    if opts.verify_checksum {
        let actual = crc32c::crc32c(&data[..page_size - 4]);
        if actual != expected {
            return Err(TracedStorageError::corruption(format!(
                "Bad page in {path} at offset {}: checksum mismatch (actual={actual} vs expect={expected})",
                pointer.offset
            )));
        }
    }
    if footer_size > page_size - PAGE_TRAILER_SIZE {
        return Err(TracedStorageError::corruption(format!(
            "Bad page in {path} at offset {}: footer size {footer_size} exceeds page size {page_size}",
            pointer.offset
        )));
    }
    let body_size = page_size - PAGE_TRAILER_SIZE - footer_size;
    let footer = PageFooterPb::decode(&data[body_size..page_size - PAGE_TRAILER_SIZE])
        .map_err(|e| {
            TracedStorageError::corruption(format!(
                "Bad page in {path} at offset {}: failed to parse footer: {e}",
                pointer.offset
            ))
        })?;

    let mut body = data.slice(..body_size);
    let uncompressed_size = footer.uncompressed_size as usize;
    if let Some(codec) = opts.codec {
        if body.len() != uncompressed_size {
            let decompressed = codec.decompress(&body, uncompressed_size)?;
            if decompressed.len() != uncompressed_size {
                return Err(TracedStorageError::corruption(format!(
                    "Bad page in {path} at offset {}: decompressed size {} != {uncompressed_size}",
                    pointer.offset,
                    decompressed.len()
                )));
            }
            body = Bytes::from(decompressed);
        }
    } else if body.len() != uncompressed_size {
        return Err(TracedStorageError::corruption(format!(
            "Bad page in {path} at offset {}: body size {} != {uncompressed_size}",
            pointer.offset,
            body.len()
        )));
    }

    let page = Arc::new(Page { body, footer });
    if let Some(cache) = cache {
        cache.insert(path, pointer.offset, page.clone());
    }
    Ok(page)
}

/// Append a page to `buf` and return where it landed.
///
/// `footer.uncompressed_size` is filled in here. The body is stored compressed
/// only if that makes it smaller.
pub fn write_page(
    buf: &mut Vec<u8>,
    body: &[u8],
    mut footer: PageFooterPb,
    codec: Option<&dyn CompressionCodec>,
) -> PagePointer {
    let offset = buf.len();
    footer.uncompressed_size = body.len() as u32;
    match codec.map(|c| c.compress(body)) {
        Some(compressed) if compressed.len() < body.len() => buf.extend_from_slice(&compressed),
        _ => buf.extend_from_slice(body),
    }
    let footer_size = footer.encoded_len();
    footer.encode_raw(buf);
    buf.put_u32_le(footer_size as u32);
    let checksum = crc32c::crc32c(&buf[offset..]);
    buf.put_u32_le(checksum);
    PagePointer::new(offset as u64, (buf.len() - offset) as u32)
}

#[cfg(test)]
mod tests {
    use risinglight_proto::segment::DataPageFooterPb;

    use super::*;
    use crate::storage::{BlockManager, MemoryBlockManager};

    fn data_footer() -> PageFooterPb {
        PageFooterPb {
            r#type: PageTypePb::DataPage as i32,
            data_page_footer: Some(DataPageFooterPb {
                first_ordinal: 0,
                num_values: 3,
                nullmap_size: 0,
            }),
            ..Default::default()
        }
    }

    fn read(
        manager: &MemoryBlockManager,
        pointer: PagePointer,
        codec: Option<&'static dyn CompressionCodec>,
        cache: Option<&PageCache>,
    ) -> StorageResult<Arc<Page>> {
        let block = manager.open_block("page")?;
        read_and_decompress_page(&PageReadOptions {
            block: &*block,
            page_pointer: pointer,
            codec,
            verify_checksum: true,
            use_page_cache: true,
            page_cache: cache,
            stats: None,
        })
    }

    #[test]
    fn read_plain_and_compressed_pages() {
        let body = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let mut buf = vec![0xff; 3];
        let plain = write_page(&mut buf, &body, data_footer(), None);
        let lz4 = get_block_compression_codec(risinglight_proto::segment::CompressionTypePb::Lz4)
            .unwrap()
            .unwrap();
        let compressed = write_page(&mut buf, &body, data_footer(), Some(lz4));
        assert!(compressed.size < plain.size);

        let manager = MemoryBlockManager::new();
        manager.put("page", buf);
        let page = read(&manager, plain, None, None).unwrap();
        assert_eq!(&page.body[..], &body[..]);
        assert_eq!(page.page_type(), PageTypePb::DataPage);
        let page = read(&manager, compressed, Some(lz4), None).unwrap();
        assert_eq!(&page.body[..], &body[..]);
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let mut buf = vec![];
        let pointer = write_page(&mut buf, b"payload", data_footer(), None);
        buf[2] ^= 0x10;
        let manager = MemoryBlockManager::new();
        manager.put("page", buf);
        let err = read(&manager, pointer, None, None).unwrap_err();
        assert!(err.is_corruption(), "{err}");
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn cached_pages_skip_io() {
        let mut buf = vec![];
        let pointer = write_page(&mut buf, b"payload", data_footer(), None);
        let manager = MemoryBlockManager::new();
        manager.put("page", buf);
        let cache = PageCache::new(1 << 20);
        read(&manager, pointer, None, Some(&cache)).unwrap();
        assert_eq!(manager.read_count(), 1);
        let page = read(&manager, pointer, None, Some(&cache)).unwrap();
        assert_eq!(manager.read_count(), 1);
        assert_eq!(&page.body[..], b"payload");
    }
}
