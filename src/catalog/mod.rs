// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Tablet schemas: the logical columns a segment is read against.

mod tablet;

pub use self::tablet::*;
