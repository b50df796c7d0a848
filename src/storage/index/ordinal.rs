// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use bytes::{Buf, BufMut};
use risinglight_proto::segment::{OrdinalIndexPb, PageTypePb};

use crate::storage::mem_tracker::MemUsage;
use crate::storage::segment::SegmentFile;
use crate::storage::{PagePointer, StorageResult, TracedStorageError};
use crate::types::RowId;

/// Size of an entry of the ordinal index page: first ordinal, page offset, page size.
pub const ORDINAL_ENTRY_SIZE: usize = 20;

/// Maps row ids to the data pages holding them.
#[derive(Debug, Clone, Default)]
pub struct OrdinalIndexReader {
    /// First row id of every page, followed by the number of rows of the column.
    ordinals: Vec<RowId>,
    pages: Vec<PagePointer>,
}

impl OrdinalIndexReader {
    pub fn load(
        file: &SegmentFile,
        meta: &OrdinalIndexPb,
        num_values: u64,
    ) -> StorageResult<Self> {
        let btree = meta.root_page.as_ref().ok_or_else(|| {
            TracedStorageError::corruption(format!("{}: ordinal index without root", file.name()))
        })?;
        let root = btree.root_page.as_ref().map(PagePointer::from).ok_or_else(|| {
            TracedStorageError::corruption(format!("{}: ordinal index without root", file.name()))
        })?;
        let num_values = RowId::try_from(num_values).map_err(|_| {
            TracedStorageError::corruption(format!("too many rows in column: {num_values}"))
        })?;

        if btree.is_root_data_page {
            return Ok(Self {
                ordinals: vec![0, num_values],
                pages: vec![root],
            });
        }

        let page = file.read_index_page(root, PageTypePb::IndexPage)?;
        let num_entries = page
            .footer
            .index_page_footer
            .as_ref()
            .map_or(0, |f| f.num_entries as usize);
        if page.body.len() != num_entries * ORDINAL_ENTRY_SIZE {
            return Err(TracedStorageError::corruption(format!(
                "{}: ordinal index page has {} bytes for {num_entries} entries",
                file.name(),
                page.body.len()
            )));
        }
        let mut body = &page.body[..];
        let mut ordinals = Vec::with_capacity(num_entries + 1);
        let mut pages = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let first = body.get_u64_le();
            let offset = body.get_u64_le();
            let size = body.get_u32_le();
            let first = RowId::try_from(first)
                .ok()
                .filter(|first| ordinals.last().map_or(true, |prev| prev <= first))
                .ok_or_else(|| {
                    TracedStorageError::corruption(format!(
                        "{}: unordered ordinal index entry {first}",
                        file.name()
                    ))
                })?;
            ordinals.push(first);
            pages.push(PagePointer::new(offset, size));
        }
        if ordinals.last().map_or(false, |last| *last > num_values) {
            return Err(TracedStorageError::corruption(format!(
                "{}: ordinal index exceeds {num_values} rows",
                file.name()
            )));
        }
        if ordinals.first().map_or(false, |first| *first != 0) {
            return Err(TracedStorageError::corruption(format!(
                "{}: ordinal index starts at row {} instead of 0",
                file.name(),
                ordinals[0]
            )));
        }
        ordinals.push(num_values);
        Ok(Self { ordinals, pages })
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn num_rows(&self) -> RowId {
        self.ordinals.last().copied().unwrap_or_default()
    }

    pub fn page(&self, page_id: usize) -> PagePointer {
        self.pages[page_id]
    }

    pub fn first_ordinal(&self, page_id: usize) -> RowId {
        self.ordinals[page_id]
    }

    /// One past the last row id of a page.
    pub fn end_ordinal(&self, page_id: usize) -> RowId {
        self.ordinals[page_id + 1]
    }

    pub fn num_rows_of_page(&self, page_id: usize) -> usize {
        (self.ordinals[page_id + 1] - self.ordinals[page_id]) as usize
    }

    /// Find the page containing `ordinal`.
    ///
    /// Returns `None` if the index is empty or `ordinal` is past the last row.
    pub fn seek_at_or_before(&self, ordinal: RowId) -> Option<usize> {
        if self.pages.is_empty() || ordinal >= self.num_rows() {
            return None;
        }
        // With pages starting at `| 0 | 100 | 200 |`, row x belongs to page i if
        // first[i] <= x < first[i + 1], i.e. right before the partition point of `first <= x`.
        let pp = self.ordinals[..self.pages.len()].partition_point(|first| *first <= ordinal);
        pp.checked_sub(1)
    }
}

impl MemUsage for OrdinalIndexReader {
    fn mem_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.ordinals.capacity() * std::mem::size_of::<RowId>()
            + self.pages.capacity() * std::mem::size_of::<PagePointer>()
    }
}

/// Walks the pages of an ordinal index in order.
#[derive(Debug, Clone)]
pub struct OrdinalPageIndexIterator {
    index: Arc<OrdinalIndexReader>,
    cur: usize,
}

impl OrdinalPageIndexIterator {
    pub fn new(index: Arc<OrdinalIndexReader>, cur: usize) -> Self {
        Self { index, cur }
    }

    pub fn valid(&self) -> bool {
        self.cur < self.index.num_pages()
    }

    pub fn next(&mut self) {
        self.cur += 1;
    }

    pub fn page_index(&self) -> usize {
        self.cur
    }

    pub fn page(&self) -> PagePointer {
        self.index.page(self.cur)
    }

    pub fn first_ordinal(&self) -> RowId {
        self.index.first_ordinal(self.cur)
    }

    pub fn end_ordinal(&self) -> RowId {
        self.index.end_ordinal(self.cur)
    }
}

/// Encode the entries of an ordinal index page.
pub fn encode_ordinal_index(entries: &[(u64, PagePointer)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * ORDINAL_ENTRY_SIZE);
    for (first, page) in entries {
        buf.put_u64_le(*first);
        buf.put_u64_le(page.offset);
        buf.put_u32_le(page.size);
    }
    buf
}

#[cfg(test)]
mod tests {
    use risinglight_proto::segment::{BTreeMetaPb, IndexPageFooterPb, PageFooterPb};

    use super::*;
    use crate::storage::segment::tests::file_from_bytes;
    use crate::storage::write_page;

    fn build(firsts: &[u64], num_values: u64) -> StorageResult<OrdinalIndexReader> {
        let entries = firsts
            .iter()
            .enumerate()
            .map(|(i, first)| (*first, PagePointer::new(i as u64 * 10, 10)))
            .collect::<Vec<_>>();
        let mut buf = vec![];
        let root = write_page(
            &mut buf,
            &encode_ordinal_index(&entries),
            PageFooterPb {
                r#type: PageTypePb::IndexPage as i32,
                index_page_footer: Some(IndexPageFooterPb {
                    num_entries: entries.len() as u32,
                }),
                ..Default::default()
            },
            None,
        );
        let file = file_from_bytes(buf);
        let meta = OrdinalIndexPb {
            root_page: Some(BTreeMetaPb {
                root_page: Some(root.to_pb()),
                is_root_data_page: false,
            }),
        };
        OrdinalIndexReader::load(&file, &meta, num_values)
    }

    #[test]
    fn seek_finds_containing_page() {
        let index = build(&[0, 100, 200], 250).unwrap();
        assert_eq!(index.num_pages(), 3);
        assert_eq!(index.seek_at_or_before(0), Some(0));
        assert_eq!(index.seek_at_or_before(99), Some(0));
        assert_eq!(index.seek_at_or_before(100), Some(1));
        assert_eq!(index.seek_at_or_before(249), Some(2));
        assert_eq!(index.seek_at_or_before(250), None);
        assert_eq!(index.end_ordinal(1), 200);
        assert_eq!(index.end_ordinal(2), 250);
        assert_eq!(index.num_rows_of_page(2), 50);
    }

    #[test]
    fn empty_index_finds_nothing() {
        let index = build(&[], 0).unwrap();
        assert_eq!(index.seek_at_or_before(0), None);
    }

    #[test]
    fn unordered_entries_are_corruption() {
        assert!(build(&[0, 100, 50], 200).unwrap_err().is_corruption());
        assert!(build(&[0, 300], 200).unwrap_err().is_corruption());
    }

    #[test]
    fn index_must_start_at_row_zero() {
        assert!(build(&[50, 100], 200).unwrap_err().is_corruption());
    }

    #[test]
    fn seek_before_first_page_finds_nothing() {
        let index = OrdinalIndexReader {
            ordinals: vec![50, 100, 200],
            pages: vec![PagePointer::new(0, 10), PagePointer::new(10, 10)],
        };
        assert_eq!(index.seek_at_or_before(10), None);
        assert_eq!(index.seek_at_or_before(50), Some(0));
    }

    #[test]
    fn empty_page_has_empty_range() {
        let index = build(&[0, 0, 10], 20).unwrap();
        assert_eq!(index.first_ordinal(0), index.end_ordinal(0));
        assert_eq!(index.num_rows_of_page(0), 0);
        assert_eq!(index.end_ordinal(2), 20);
    }

    #[test]
    fn page_iterator() {
        let index = Arc::new(build(&[0, 10, 20], 30).unwrap());
        let mut iter = OrdinalPageIndexIterator::new(index, 1);
        assert!(iter.valid());
        assert_eq!((iter.first_ordinal(), iter.end_ordinal()), (10, 20));
        iter.next();
        assert_eq!(iter.page(), PagePointer::new(20, 10));
        iter.next();
        assert!(!iter.valid());
    }
}
