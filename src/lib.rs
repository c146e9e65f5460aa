/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

//! An embeddable single-file key-value store: a self-contained on-disk hash table with
//! string put/get/remove and list append/prepend/pop-tail/pop-head, each with O(1) expected
//! complexity under a single-writer advisory file lock.
//!
//! [`store::FileStore`] is the sole entry point. It owns one regular file laid out as a
//! fixed header, a dense index of slot pointers, and a heap of variable-length records (see
//! `record` for the on-disk record format and `hash` for how a key maps to a slot).

pub mod common;
pub mod error;
pub mod hash;
pub mod record;
pub mod store;

pub use error::{Error, Result};
pub use store::{FileStore, OpenOptions};
