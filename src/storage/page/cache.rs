// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use moka::sync::Cache;

use super::Page;
use crate::storage::mem_tracker::MemUsage;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageCacheKey {
    file: String,
    offset: u64,
}

/// Decompressed pages shared by every reader, bounded by total bytes.
#[derive(Clone)]
pub struct PageCache {
    cache: Cache<PageCacheKey, Arc<Page>>,
}

impl PageCache {
    pub fn new(capacity_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &PageCacheKey, page: &Arc<Page>| -> u32 {
                page.mem_usage().try_into().unwrap_or(u32::MAX)
            })
            .build();
        Self { cache }
    }

    pub fn lookup(&self, file: &str, offset: u64) -> Option<Arc<Page>> {
        self.cache.get(&PageCacheKey {
            file: file.to_string(),
            offset,
        })
    }

    pub fn insert(&self, file: &str, offset: u64, page: Arc<Page>) {
        self.cache.insert(
            PageCacheKey {
                file: file.to_string(),
                offset,
            },
            page,
        );
    }
}
