// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Segments are immutable column-oriented files.
//!
//! ```plain
//! | data pages | index pages | short key page | footer | footer length | crc32c | magic |
//! ```
//!
//! A [`Segment`] parses the footer on open, creates one [`ColumnReader`] per
//! column of the tablet schema found in the file, and builds iterators that prune
//! rows with the column indexes before decoding any data page.
//!
//! [`ColumnReader`]: crate::storage::ColumnReader

mod adapter;
mod file;
mod footer;
mod iterator;
#[allow(clippy::module_inception)]
mod segment;

pub use self::adapter::*;
pub use self::file::*;
pub use self::footer::*;
pub use self::iterator::*;
pub use self::segment::*;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::SegmentFile;
    use crate::storage::{BlockManager, MemTracker, MemoryBlockManager};

    /// A segment file over `data`, without page cache.
    pub fn file_from_bytes(data: Vec<u8>) -> SegmentFile {
        let manager = MemoryBlockManager::new();
        manager.put("test.dat", data);
        let block = manager.open_block("test.dat").unwrap();
        SegmentFile::new("test.dat", 0, block, None, MemTracker::new("test"))
    }

    #[test]
    fn file_reads_typed_index_pages() {
        use risinglight_proto::segment::{PageFooterPb, PageTypePb};

        use crate::storage::write_page;

        let mut buf = vec![];
        let footer = PageFooterPb {
            r#type: PageTypePb::IndexPage as i32,
            ..Default::default()
        };
        let pointer = write_page(&mut buf, b"index", footer, None);
        let file = Arc::new(file_from_bytes(buf));
        let page = file.read_index_page(pointer, PageTypePb::IndexPage).unwrap();
        assert_eq!(&page.body[..], b"index");
        let err = file
            .read_index_page(pointer, PageTypePb::ShortKeyPage)
            .unwrap_err();
        assert!(err.is_corruption());
    }
}
