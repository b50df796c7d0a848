// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use risinglight_proto::segment::PageTypePb;

use crate::storage::{
    CompressionCodec, MemTracker, Page, PageCache, PagePointer, PageReadOptions, ReadableBlock,
    ReaderStatistics, StorageResult, read_and_decompress_page,
};

/// An opened segment file shared by the segment and all its column readers.
pub struct SegmentFile {
    name: String,
    segment_id: u32,
    block: Arc<dyn ReadableBlock>,
    page_cache: Option<Arc<PageCache>>,
    mem_tracker: Arc<MemTracker>,
    use_page_cache_for_index: bool,
    verify_checksum: bool,
}

impl SegmentFile {
    pub fn new(
        name: impl Into<String>,
        segment_id: u32,
        block: Arc<dyn ReadableBlock>,
        page_cache: Option<Arc<PageCache>>,
        mem_tracker: Arc<MemTracker>,
    ) -> Self {
        Self {
            name: name.into(),
            segment_id,
            block,
            page_cache,
            mem_tracker,
            use_page_cache_for_index: true,
            verify_checksum: true,
        }
    }

    pub fn with_page_cache_for_index(mut self, enabled: bool) -> Self {
        self.use_page_cache_for_index = enabled;
        self
    }

    pub fn with_verify_checksum(mut self, enabled: bool) -> Self {
        self.verify_checksum = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    pub fn block(&self) -> &dyn ReadableBlock {
        &*self.block
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    /// Read a data or dictionary page.
    pub fn read_page(
        &self,
        pointer: PagePointer,
        codec: Option<&'static dyn CompressionCodec>,
        use_page_cache: bool,
        stats: Option<&ReaderStatistics>,
    ) -> StorageResult<Arc<Page>> {
        read_and_decompress_page(&PageReadOptions {
            block: &*self.block,
            page_pointer: pointer,
            codec,
            verify_checksum: self.verify_checksum,
            use_page_cache,
            page_cache: self.page_cache.as_deref(),
            stats,
        })
    }

    /// Read an uncompressed index page and check its type.
    pub fn read_index_page(
        &self,
        pointer: PagePointer,
        expected: PageTypePb,
    ) -> StorageResult<Arc<Page>> {
        let page = self.read_page(pointer, None, self.use_page_cache_for_index, None)?;
        page.expect_type(expected, &self.name)?;
        Ok(page)
    }
}
