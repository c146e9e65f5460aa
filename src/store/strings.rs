/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

/*! The string engine: `put`/`get`/`remove`/`fetch_remove`. Built entirely on the chain walk
 * and address primitives in `store::mod`. This module never seeks against the file itself.
 *
 * Values are size-banded (see `common::band`) so a later overwrite within the same band
 * rewrites in place; keys are never banded, so a key whose length changes is impossible by
 * construction (the chain walk only ever matches on byte-identical keys).
 */
use crate::common::{band, Offset};
use crate::error::Result;
use crate::record::{Address, RecordType};

use super::chain::{ChainWalk, FoundRecord};
use super::lists;
use super::Inner;

fn new_string_address(key: &[u8], value: &[u8], chain_next: Option<Offset>) -> Address {
    Address {
        record_type: RecordType::Str,
        chain_next,
        list_next: None,
        list_prev: None,
        list_end: None,
        key_len: key.len() as u16,
        value_len: value.len() as u32,
        max_key_len: key.len() as u16,
        max_value_len: band(value.len() as u32),
    }
}

pub(crate) fn put_string(inner: &mut Inner, key: &[u8], value: &[u8]) -> Result<()> {
    let walk = inner.find_in_chain(key)?;

    match &walk.found {
        None => {
            let address = new_string_address(key, value, None);
            let offset = inner.append_record(&address, key, value)?;
            inner.link_new_chain_tail(&walk, offset)?;
            inner.inc_ref_count()?;
        }
        Some(found) if found.address.record_type == RecordType::Str => {
            if value.len() as u32 <= found.address.max_value_len {
                inner.write_value_in_place(found.offset, &found.address, value)?;
            } else {
                let address = new_string_address(key, value, found.address.chain_next);
                let new_offset = inner.append_record(&address, key, value)?;
                inner.relink_chain_predecessor(&walk, found, Some(new_offset))?;
            }
        }
        Some(found) => {
            // A key whose current record is a list gets overwritten wholesale: deallocate
            // every node of the list, then write the string as a fresh record. Net ref_count
            // change is `-nodes + 1`, so only the new record gets `inc_ref_count`.
            lists::dealloc_list_nodes(inner, found.offset, found.address)?;
            let address = new_string_address(key, value, found.address.chain_next);
            let new_offset = inner.append_record(&address, key, value)?;
            inner.relink_chain_predecessor(&walk, found, Some(new_offset))?;
            inner.inc_ref_count()?;
        }
    }

    inner.file.sync_all()?;
    Ok(())
}

pub(crate) fn get_string(inner: &mut Inner, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let walk = inner.find_in_chain(key)?;
    match walk.found {
        Some(found) if found.address.record_type == RecordType::Str => {
            Ok(Some(inner.read_value(found.offset, &found.address)?))
        }
        // A list-typed record under this key is not a string; `get` reports it as absent
        // rather than surfacing the list's head element.
        _ => Ok(None),
    }
}

pub(crate) fn remove_string(inner: &mut Inner, key: &[u8]) -> Result<()> {
    let walk = inner.find_in_chain(key)?;
    let Some(found) = walk.found else {
        return Ok(());
    };
    remove_whatever(inner, &walk, &found)?;
    inner.file.sync_all()?;
    Ok(())
}

pub(crate) fn fetch_remove_string(inner: &mut Inner, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let walk = inner.find_in_chain(key)?;
    let Some(found) = walk.found else {
        return Ok(None);
    };
    let value = match found.address.record_type {
        RecordType::Str => Some(inner.read_value(found.offset, &found.address)?),
        RecordType::List => None,
    };
    remove_whatever(inner, &walk, &found)?;
    inner.file.sync_all()?;
    Ok(value)
}

/// Removes whatever record is under `found` wholesale, string or list alike. The key
/// disappears entirely either way.
fn remove_whatever(inner: &mut Inner, walk: &ChainWalk, found: &FoundRecord) -> Result<()> {
    inner.relink_chain_predecessor(walk, found, found.address.chain_next)?;
    match found.address.record_type {
        RecordType::Str => {
            inner.dec_ref_count()?;
            inner.maybe_truncate_tail(found.offset, found.address.record_len())?;
        }
        RecordType::List => {
            lists::dealloc_list_nodes(inner, found.offset, found.address)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::{FileStore, OpenOptions};
    use tempfile::NamedTempFile;

    fn store(index_size: u32) -> FileStore {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        FileStore::open(
            &path,
            OpenOptions {
                index_size,
                truncate: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_put_get_basic() {
        let store = store(1024);
        store.put(b"foo", b"bar").unwrap();
        store.put(b"baz", b"qux").unwrap();
        assert_eq!(store.get(b"foo").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(store.get(b"baz").unwrap(), Some(b"qux".to_vec()));
        assert_eq!(store.get(b"absent").unwrap(), None);
    }

    #[test]
    fn test_overwrite_within_band_does_not_grow_file() {
        let store = store(1024);
        store.put(b"foo", b"aaaaaaaaaaaa").unwrap();
        let path = {
            let inner = store.inner.lock().unwrap();
            inner.path.clone()
        };
        let size_after_first = std::fs::metadata(&path).unwrap().len();

        store.put(b"foo", b"bb").unwrap();
        store.put(b"foo", b"cccccc").unwrap();
        store.put(b"foo", b"eeeeeeeeeeeeeeeeeeee").unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), size_after_first);
        assert_eq!(store.get(b"foo").unwrap(), Some(b"eeeeeeeeeeeeeeeeeeee".to_vec()));
    }

    #[test]
    fn test_collision_chain_put_get_remove() {
        // A single slot forces every key to collide and thread through `chain_next`.
        let store = store(4);
        store.put(b"foo", b"baz").unwrap();
        store.put(b"foo", b"qux").unwrap();
        store.put(b"bar", b"quux").unwrap();

        assert_eq!(store.get(b"foo").unwrap(), Some(b"qux".to_vec()));
        assert_eq!(store.get(b"bar").unwrap(), Some(b"quux".to_vec()));

        store.remove(b"foo").unwrap();
        assert_eq!(store.get(b"foo").unwrap(), None);
        assert_eq!(store.get(b"bar").unwrap(), Some(b"quux".to_vec()));
    }

    #[test]
    fn test_fetch_remove_is_idempotent() {
        let store = store(1024);
        store.put(b"foo", b"bar").unwrap();
        assert_eq!(store.fetch_remove(b"foo").unwrap(), Some(b"bar".to_vec()));
        assert_eq!(store.get(b"foo").unwrap(), None);
        assert_eq!(store.fetch_remove(b"foo").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites_list_with_string() {
        let store = store(1024);
        store.append(b"k", b"v1").unwrap();
        store.append(b"k", b"v2").unwrap();
        store.put(b"k", b"v3").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(store.pop(b"k").unwrap(), None);
    }

    #[test]
    fn test_truncation_on_empty() {
        let store = store(64);
        let path = {
            let inner = store.inner.lock().unwrap();
            inner.path.clone()
        };
        let empty_size = std::fs::metadata(&path).unwrap().len();

        store.put(b"k", b"v").unwrap();
        store.remove(b"k").unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), empty_size);
    }
}
