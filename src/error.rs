/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

use crate::common::MAX_KEY_LEN;

/// Errors surfaced by the file-backed store. Validation errors carry no side effects;
/// `FileCorrupted` means the store is no longer safe to use and the caller should reopen
/// with `truncate: true` to start clean.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("address space size {0} is not a multiple of 4")]
    InvalidAddressSpaceSize(u32),

    #[error("no file path supplied")]
    MissingFilePath,

    #[error("key length {0} exceeds the maximum of {MAX_KEY_LEN}")]
    KeyTooLong(usize),

    #[error("file is corrupted: {0}")]
    FileCorrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
