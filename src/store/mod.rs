/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

/*! The file-backed store: header/index I/O, the address read/update primitives, reference
 * counting and truncation, and the mutex + advisory file lock that guard all of it. The
 * string and list engines (`store::strings`, `store::lists`) are built entirely on top of
 * the primitives here; neither touches the `File` directly.
 */
use std::fs::{File, OpenOptions as StdOpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs4::FileExt;
use log::{debug, trace, warn};

use crate::common::{Offset, ADDRESS_LEN, HEADER_LEN, MAX_KEY_LEN};
use crate::error::{Error, Result};
use crate::record::{Address, LinkPatch};

mod chain;
mod lists;
mod strings;

/// Parameters for [`FileStore::open`]. Renders the constructor's `(path, address_space_size,
/// truncate)` arguments as an explicit options struct, the way storage-engine crates in the
/// wider Rust ecosystem tend to render multi-argument constructors.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    /// Total size of the index region, in bytes. Must be a positive multiple of 4. Only
    /// consulted when creating a new file or when `truncate` is set. Reopening an existing
    /// file without truncating always uses the `index_size` already recorded in its header.
    pub index_size: u32,
    /// Truncate (or create) the file, discarding any existing contents.
    pub truncate: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            index_size: 1024,
            truncate: false,
        }
    }
}

/// The 8-byte on-disk header: index size and live-record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub index_size: u32,
    pub ref_count: u32,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(&self.index_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ref_count.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_LEN as usize]) -> Self {
        let index_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let ref_count = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Self {
            index_size,
            ref_count,
        }
    }
}

/// The state guarded by `FileStore`'s mutex: the open file, its cached header, and its path
/// (kept around for log messages, not reopened per-call).
pub(crate) struct Inner {
    file: File,
    header: Header,
    path: PathBuf,
}

/// A single mutable handle over one on-disk hash table. Every operation takes the store's
/// mutex for its full duration, so observable order is the serial order in which callers
/// acquire it.
pub struct FileStore {
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open (or create) the file-backed store at `path`.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::MissingFilePath);
        }
        if options.index_size % 4 != 0 || options.index_size == 0 {
            return Err(Error::InvalidAddressSpaceSize(options.index_size));
        }

        let existed = path.exists();
        let mut file = StdOpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| Error::FileCorrupted(format!("{} is locked by another process", path.display())))?;

        let fresh = options.truncate || !existed || file.metadata()?.len() == 0;
        let header = if fresh {
            debug!("initializing new store at {}", path.display());
            let header = Header {
                index_size: options.index_size,
                ref_count: 0,
            };
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.to_bytes())?;
            file.write_all(&vec![0u8; header.index_size as usize])?;
            file.sync_all()?;
            header
        } else {
            let mut buf = [0u8; HEADER_LEN as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let header = Header::from_bytes(&buf);
            if header.index_size % 4 != 0 || header.index_size == 0 {
                return Err(Error::FileCorrupted(format!(
                    "stored index_size {} is not a positive multiple of 4",
                    header.index_size
                )));
            }
            debug!(
                "reopened existing store at {} ({} live records)",
                path.display(),
                header.ref_count
            );
            header
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                header,
                path: path.to_path_buf(),
            }),
        })
    }

    /// Release the advisory lock and close the file handle.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner().expect("store mutex poisoned");
        FileExt::unlock(&inner.file)?;
        Ok(())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        strings::put_string(&mut inner, key, value)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        strings::get_string(&mut inner, key)
    }

    pub fn remove(&self, key: &[u8]) -> Result<()> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        strings::remove_string(&mut inner, key)?;
        Ok(())
    }

    pub fn fetch_remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        strings::fetch_remove_string(&mut inner, key)
    }

    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        lists::append(&mut inner, key, value)
    }

    pub fn prepend(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        lists::prepend(&mut inner, key, value)
    }

    /// Pop the most recently appended (or least recently prepended) element: LIFO on
    /// `append`, the tail end of the list.
    pub fn pop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        lists::pop_tail(&mut inner, key)
    }

    /// Pop the least recently appended (or most recently prepended) element: FIFO on
    /// `append`, the head end of the list.
    pub fn pop_first(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key_len(key)?;
        let mut inner = self.lock();
        lists::pop_head(&mut inner, key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

fn validate_key_len(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLong(key.len()));
    }
    Ok(())
}

impl Inner {
    fn index_size(&self) -> u32 {
        self.header.index_size
    }

    fn file_len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        Ok(())
    }

    fn inc_ref_count(&mut self) -> Result<()> {
        self.header.ref_count += 1;
        self.write_header()
    }

    /// Decrement the live-record count. Truncates the file back to just the header and
    /// index region (and zeroes that region) if the count reaches zero. The store is then
    /// byte-for-byte identical to a freshly initialized one.
    fn dec_ref_count(&mut self) -> Result<()> {
        if self.header.ref_count == 0 {
            debug_assert!(false, "ref_count underflow");
            return Err(Error::FileCorrupted(
                "ref_count underflowed below zero".to_string(),
            ));
        }
        self.header.ref_count -= 1;
        self.write_header()?;

        if self.header.ref_count == 0 {
            let total_len = HEADER_LEN as u64 + self.index_size() as u64;
            warn!("store at {} emptied, truncating to header+index", self.path.display());
            self.file.set_len(total_len)?;
            self.file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
            self.file
                .write_all(&vec![0u8; self.index_size() as usize])?;
        }
        Ok(())
    }

    /// Opportunistically truncate away a just-removed record if its bytes were the last
    /// thing in the file. Only ever shrinks the file; never called when the removed record
    /// wasn't at EOF.
    fn maybe_truncate_tail(&mut self, offset: Offset, record_len: u32) -> Result<()> {
        let file_len = self.file_len()?;
        if offset as u64 + record_len as u64 == file_len {
            trace!("truncating trailing record at offset {offset}");
            self.file.set_len(offset as u64)?;
        }
        Ok(())
    }

    fn read_slot(&mut self, slot_offset: Offset) -> Result<Option<Offset>> {
        let mut buf = [0u8; 4];
        self.file.seek(SeekFrom::Start(slot_offset as u64))?;
        self.file.read_exact(&mut buf)?;
        let value = u32::from_le_bytes(buf);
        Ok(if value == 0 { None } else { Some(value) })
    }

    fn write_slot(&mut self, slot_offset: Offset, value: Option<Offset>) -> Result<()> {
        self.file.seek(SeekFrom::Start(slot_offset as u64))?;
        self.file.write_all(&value.unwrap_or(0).to_le_bytes())?;
        Ok(())
    }

    /// Read the 29-byte address at `offset`. Returns `Ok(None)` for an all-zero address
    /// (an offset that was never written), and a `FileCorrupted` error for a short read.
    fn read_address(&mut self, offset: Offset) -> Result<Option<Address>> {
        let mut buf = [0u8; ADDRESS_LEN as usize];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut buf).map_err(|e| {
            Error::FileCorrupted(format!(
                "short read of address at offset {offset}: {e}"
            ))
        })?;
        Address::from_bytes(&buf)
    }

    /// Read a live record's address, failing with `FileCorrupted` if the offset turns out to
    /// be empty. Callers only ever dereference pointers they've already validated as live.
    fn read_live_address(&mut self, offset: Offset) -> Result<Address> {
        self.read_address(offset)?.ok_or_else(|| {
            Error::FileCorrupted(format!("expected a live record at offset {offset}"))
        })
    }

    /// Selectively rewrite a record's type tag and/or linkage pointers, leaving its
    /// key/value tail untouched.
    fn update_links(&mut self, offset: Offset, patch: LinkPatch) -> Result<()> {
        let mut buf = [0u8; ADDRESS_LEN as usize];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut buf)?;
        patch.apply(&mut buf)?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Read the live key bytes for the record at `offset` into `buf`, returning the
    /// occupied length. `buf` must be at least `address.key_len` bytes.
    fn read_key(&mut self, offset: Offset, address: &Address, buf: &mut [u8; MAX_KEY_LEN]) -> Result<usize> {
        let key_len = address.key_len as usize;
        self.file
            .seek(SeekFrom::Start(offset as u64 + ADDRESS_LEN as u64))?;
        self.file.read_exact(&mut buf[..key_len])?;
        Ok(key_len)
    }

    /// Read the live value bytes for the record at `offset`.
    fn read_value(&mut self, offset: Offset, address: &Address) -> Result<Vec<u8>> {
        let value_off = offset as u64 + ADDRESS_LEN as u64 + address.max_key_len as u64;
        let mut buf = vec![0u8; address.value_len as usize];
        self.file.seek(SeekFrom::Start(value_off))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write a brand-new record (address + key + zero-padded key slack + value +
    /// zero-padded value slack) at `offset`. Used both for records created at EOF and for
    /// in-place rewrites where the address capacity hasn't changed.
    fn write_record(&mut self, offset: Offset, address: &Address, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert_eq!(key.len(), address.key_len as usize);
        debug_assert_eq!(value.len(), address.value_len as usize);

        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&address.to_bytes())?;
        self.file.write_all(key)?;
        self.file
            .write_all(&vec![0u8; address.max_key_len as usize - key.len()])?;
        self.file.write_all(value)?;
        self.file
            .write_all(&vec![0u8; address.max_value_len as usize - value.len()])?;
        Ok(())
    }

    /// Append a brand-new record at EOF and return its offset.
    fn append_record(&mut self, address: &Address, key: &[u8], value: &[u8]) -> Result<Offset> {
        let offset = self.file_len()? as u32;
        self.write_record(offset, address, key, value)?;
        Ok(offset)
    }

    /// Rewrite just the value (and `value_len`) of an existing record in place, leaving its
    /// key, `max_key_len`, and `max_value_len` untouched. Caller is responsible for having
    /// checked that `value.len() <= address.max_value_len`.
    fn write_value_in_place(&mut self, offset: Offset, address: &Address, value: &[u8]) -> Result<()> {
        debug_assert!(value.len() <= address.max_value_len as usize);

        let mut addr_buf = [0u8; ADDRESS_LEN as usize];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut addr_buf)?;
        Address::write_value_len(&mut addr_buf, value.len() as u32)?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&addr_buf)?;

        let value_off = offset as u64 + ADDRESS_LEN as u64 + address.max_key_len as u64;
        self.file.seek(SeekFrom::Start(value_off))?;
        self.file.write_all(value)?;
        self.file
            .write_all(&vec![0u8; address.max_value_len as usize - value.len()])?;
        Ok(())
    }
}
