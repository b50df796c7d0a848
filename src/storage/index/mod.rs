// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Readers of the per-column indexes stored in a segment.
//!
//! * [`OrdinalIndexReader`] maps row ids to data pages. Every scalar column has one.
//! * [`ZoneMapIndexReader`] keeps min / max / null summaries of each page.
//! * [`BitmapIndexReader`] maps each distinct value to the bitmap of rows holding it.
//! * [`BloomFilterIndexReader`] keeps one bloom filter per page.
//! * [`ShortKeyIndexDecoder`] locates sort-key prefixes at block granularity.

mod bitmap;
mod bloom_filter;
mod ordinal;
mod short_key;
mod zone_map;

use risinglight_proto::segment::IndexedColumnMetaPb;

pub use self::bitmap::*;
pub use self::bloom_filter::*;
pub use self::ordinal::*;
pub use self::short_key::*;
pub use self::zone_map::*;
use super::{PagePointer, StorageResult, TracedStorageError};

/// Page holding the values of an indexed column.
fn indexed_column_page(meta: Option<&IndexedColumnMetaPb>, what: &str) -> StorageResult<PagePointer> {
    meta.and_then(|m| m.page.as_ref())
        .map(PagePointer::from)
        .ok_or_else(|| TracedStorageError::corruption(format!("missing {what} page")))
}
