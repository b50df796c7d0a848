// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! The segment footer sits at the end of the file:
//!
//! ```plain
//! | SegmentFooterPb | footer length (u32) | crc32c of footer (u32) | magic "D0R1" |
//! ```

use bytes::{Buf, BufMut};
use prost::Message;
use risinglight_proto::segment::{FooterPointerPb, SegmentFooterPb};
use tracing::debug;

use crate::storage::{ReadableBlock, StorageResult, TracedStorageError};

pub const SEGMENT_MAGIC: &[u8; 4] = b"D0R1";

/// Footer length, checksum and magic.
pub const SEGMENT_TRAILER_SIZE: usize = 12;

/// Bytes read from the end of the file when the caller gives no hint.
pub const DEFAULT_FOOTER_LENGTH_HINT: usize = 4096;

/// Read and verify the footer of a segment file.
///
/// The last `footer_length_hint` bytes are read first. If the footer turns out to
/// be longer, the missing prefix is read with a second I/O and the hint is raised
/// so the next open of a similar file needs one read. With `partial_footer`, the
/// footer is read from that location instead of the end of the file.
pub fn parse_segment_footer(
    block: &dyn ReadableBlock,
    footer_length_hint: Option<&mut usize>,
    partial_footer: Option<&FooterPointerPb>,
) -> StorageResult<SegmentFooterPb> {
    let path = block.path();
    let file_size = block.size()?;
    if file_size < SEGMENT_TRAILER_SIZE as u64 {
        return Err(TracedStorageError::corruption(format!(
            "Bad segment file {path}: file size {file_size} < {SEGMENT_TRAILER_SIZE}"
        )));
    }

    let hint = footer_length_hint
        .as_deref()
        .copied()
        .unwrap_or(DEFAULT_FOOTER_LENGTH_HINT);
    let (read_pos, read_size) = match partial_footer {
        Some(pointer) => {
            let end = pointer
                .position
                .checked_add(pointer.size as u64)
                .ok_or_else(|| {
                    TracedStorageError::corruption(format!(
                        "Bad partial segment file {path}: footer pointer {} + {} overflows",
                        pointer.position, pointer.size
                    ))
                })?;
            if file_size < end {
                return Err(TracedStorageError::corruption(format!(
                    "Bad partial segment file {path}: file size {file_size} < {end}"
                )));
            }
            if (pointer.size as usize) < SEGMENT_TRAILER_SIZE {
                return Err(TracedStorageError::corruption(format!(
                    "Bad partial segment file {path}: footer size {} < {SEGMENT_TRAILER_SIZE}",
                    pointer.size
                )));
            }
            (pointer.position, pointer.size as usize)
        }
        None => {
            let size = (hint.max(SEGMENT_TRAILER_SIZE) as u64).min(file_size);
            (file_size - size, size as usize)
        }
    };
    let buff = block.read_bytes(read_pos, read_size)?;

    let mut trailer = &buff[read_size - SEGMENT_TRAILER_SIZE..];
    let footer_length = trailer.get_u32_le() as usize;
    let checksum = trailer.get_u32_le();
    if trailer != SEGMENT_MAGIC {
        return Err(TracedStorageError::corruption(format!(
            "Bad segment file {path}: magic number not match"
        )));
    }

    let footer_end = read_pos + (read_size - SEGMENT_TRAILER_SIZE) as u64;
    if footer_end < footer_length as u64 {
        return Err(TracedStorageError::corruption(format!(
            "Bad segment file {path}: file size {file_size} < {}",
            SEGMENT_TRAILER_SIZE + footer_length
        )));
    }
    if let Some(hint) = footer_length_hint {
        if footer_length > *hint {
            // leave some room for the next file
            *hint = footer_length + 128;
        }
    }

    let buff = buff.slice(..read_size - SEGMENT_TRAILER_SIZE);
    let parse_err = |e: prost::DecodeError| {
        TracedStorageError::corruption(format!(
            "Bad segment file {path}: failed to parse footer: {e}"
        ))
    };
    let check = |actual: u32| {
        if actual != checksum {
            return Err(TracedStorageError::corruption(format!(
                "Bad segment file {path}: footer checksum not match, actual={actual} vs expect={checksum}"
            )));
        }
        Ok(())
    };

    let footer = if footer_length <= buff.len() {
        let data = buff.slice(buff.len() - footer_length..);
        check(crc32c::crc32c(&data))?;
        debug!(path, footer_length, "segment footer read in 1 I/O");
        SegmentFooterPb::decode(data).map_err(parse_err)?
    } else {
        let prefix_len = footer_length - buff.len();
        let prefix = block.read_bytes(footer_end - footer_length as u64, prefix_len)?;
        check(crc32c::crc32c_append(crc32c::crc32c(&prefix), &buff))?;
        debug!(path, footer_length, hint, "segment footer read in 2 I/Os");
        SegmentFooterPb::decode(prefix.chain(buff)).map_err(parse_err)?
    };
    Ok(footer)
}

/// Append the footer and trailer of a segment to `buf`.
pub fn serialize_segment_footer(footer: &SegmentFooterPb, buf: &mut Vec<u8>) {
    let start = buf.len();
    footer.encode_raw(buf);
    let checksum = crc32c::crc32c(&buf[start..]);
    buf.put_u32_le((buf.len() - start) as u32);
    buf.put_u32_le(checksum);
    buf.put_slice(SEGMENT_MAGIC);
}

#[cfg(test)]
mod tests {
    use risinglight_proto::segment::ColumnMetaPb;

    use super::*;
    use crate::storage::{BlockManager, MemoryBlockManager};

    fn footer(num_columns: u32) -> SegmentFooterPb {
        SegmentFooterPb {
            version: 1,
            num_rows: 200,
            columns: (0..num_columns)
                .map(|i| ColumnMetaPb {
                    column_id: i,
                    unique_id: i,
                    num_rows: 200,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn file(footer: &SegmentFooterPb) -> (MemoryBlockManager, Vec<u8>) {
        let mut buf = vec![0xab; 100];
        serialize_segment_footer(footer, &mut buf);
        let manager = MemoryBlockManager::new();
        manager.put("seg", buf.clone());
        (manager, buf)
    }

    #[test]
    fn small_hint_grows_after_second_read() {
        let expected = footer(100);
        let footer_length = expected.encoded_len();
        assert!(footer_length > 64);
        let (manager, _) = file(&expected);
        let block = manager.open_block("seg").unwrap();

        let mut hint = 64;
        let parsed = parse_segment_footer(&*block, Some(&mut hint), None).unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(hint, footer_length + 128);
        assert_eq!(manager.read_count(), 2);

        manager.reset_read_count();
        let parsed = parse_segment_footer(&*block, Some(&mut hint), None).unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(hint, footer_length + 128);
        assert_eq!(manager.read_count(), 1);
    }

    #[test]
    fn partial_footer_pointer() {
        let expected = footer(3);
        let mut buf = vec![];
        serialize_segment_footer(&expected, &mut buf);
        let position = 10;
        let size = buf.len() as u32;
        let mut data = vec![0; position];
        data.extend_from_slice(&buf);
        data.extend_from_slice(&[0; 50]);
        let manager = MemoryBlockManager::new();
        manager.put("seg", data);
        let block = manager.open_block("seg").unwrap();
        let pointer = FooterPointerPb {
            position: position as u64,
            size,
        };
        let parsed = parse_segment_footer(&*block, None, Some(&pointer)).unwrap();
        assert_eq!(parsed, expected);

        let pointer = FooterPointerPb {
            position: 100,
            size,
        };
        let err = parse_segment_footer(&*block, None, Some(&pointer)).unwrap_err();
        assert!(err.is_corruption());

        let pointer = FooterPointerPb {
            position: u64::MAX - 4,
            size,
        };
        let err = parse_segment_footer(&*block, None, Some(&pointer)).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn corrupted_trailers() {
        let expected = footer(2);
        let (_, buf) = file(&expected);
        let open = |data: Vec<u8>| {
            let manager = MemoryBlockManager::new();
            manager.put("seg", data);
            let block = manager.open_block("seg").unwrap();
            parse_segment_footer(&*block, None, None)
        };

        let mut bad_magic = buf.clone();
        *bad_magic.last_mut().unwrap() = b'X';
        let err = open(bad_magic).unwrap_err();
        assert!(err.to_string().contains("magic number not match"));

        let mut bad_body = buf.clone();
        let len = bad_body.len();
        bad_body[len - SEGMENT_TRAILER_SIZE - 1] ^= 0xff;
        let err = open(bad_body).unwrap_err();
        assert!(err.to_string().contains("footer checksum not match"));

        let err = open(vec![0; 11]).unwrap_err();
        assert!(err.is_corruption());

        let mut too_long = vec![];
        too_long.put_u32_le(1000);
        too_long.put_u32_le(0);
        too_long.put_slice(SEGMENT_MAGIC);
        let err = open(too_long).unwrap_err();
        assert!(err.to_string().contains("file size 12 < 1012"));
    }
}
