// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Reader of columnar segment files for the RisingLight storage engine.

#![deny(unused_must_use)]

pub mod array;
pub mod catalog;
pub mod storage;
pub mod types;

#[doc(hidden)]
pub mod testing;
