// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Reader of columnar segment files.
//!
//! A segment file holds the data pages and indexes of every column of a set of
//! rows, followed by a footer describing them:
//!
//! ```plain
//! | column pages and indexes ... | short key page | footer | trailer |
//! ```
//!
//! [`Segment::open`] parses the footer and builds a [`ColumnReader`] per column.
//! Indexes are loaded lazily on first use. [`Segment::new_iterator`] prunes rows
//! with the indexes and returns the remaining ones as [`Chunk`](crate::array::Chunk)s.

mod column;
mod error;
mod index;
mod io;
pub mod mem_tracker;
mod options;
mod page;
mod predicate;
mod range;
mod segment;
mod statistics;

pub use self::column::*;
pub use self::error::*;
pub use self::index::*;
pub use self::io::*;
pub use self::mem_tracker::{MemGuard, MemTracker, MemUsage, Tracked};
pub use self::options::*;
pub use self::page::*;
pub use self::predicate::*;
pub use self::range::*;
pub use self::segment::*;
pub use self::statistics::*;
