/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

//! Property-based tests for the store's universal invariants, checked over randomized
//! operation sequences against a reference model.

use std::collections::HashMap;

use filekv::{FileStore, OpenOptions};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use tempfile::NamedTempFile;

const KEY_SPACE: u8 = 6;

fn open_store(index_size: u32) -> (FileStore, tempfile::TempPath) {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let store = FileStore::open(
        &path,
        OpenOptions {
            index_size,
            truncate: true,
        },
    )
    .unwrap();
    (store, path)
}

fn small_value(g: &mut Gen) -> Vec<u8> {
    let len = usize::arbitrary(g) % 24;
    (0..len).map(|_| u8::arbitrary(g)).collect()
}

#[derive(Clone, Debug)]
enum StringOp {
    Put(u8, Vec<u8>),
    Remove(u8),
    FetchRemove(u8),
}

impl Arbitrary for StringOp {
    fn arbitrary(g: &mut Gen) -> Self {
        let key = u8::arbitrary(g) % KEY_SPACE;
        match u8::arbitrary(g) % 3 {
            0 => StringOp::Put(key, small_value(g)),
            1 => StringOp::Remove(key),
            _ => StringOp::FetchRemove(key),
        }
    }
}

/// Invariants 1, 2 and 6: round-trip, absent keys, and fetch_remove idempotence, all checked
/// together against a reference `HashMap` model driven by the same operation sequence.
#[quickcheck]
fn prop_string_model_matches(ops: Vec<StringOp>) -> bool {
    let (store, _path) = open_store(64);
    let mut model: HashMap<u8, Vec<u8>> = HashMap::new();

    for op in &ops {
        match op {
            StringOp::Put(k, v) => {
                store.put(&[*k], v).unwrap();
                model.insert(*k, v.clone());
            }
            StringOp::Remove(k) => {
                store.remove(&[*k]).unwrap();
                model.remove(k);
            }
            StringOp::FetchRemove(k) => {
                let expected = model.remove(k);
                let actual = store.fetch_remove(&[*k]).unwrap();
                if actual != expected {
                    return false;
                }
                // Idempotence: a second fetch_remove on the same key returns none.
                if store.fetch_remove(&[*k]).unwrap().is_some() {
                    return false;
                }
            }
        }
    }

    (0..KEY_SPACE).all(|k| store.get(&[k]).unwrap() == model.get(&k).cloned())
}

/// Invariant 9: with a single slot (every key collides), string operations still resolve
/// correctly by key.
#[quickcheck]
fn prop_single_slot_collision_resolution(ops: Vec<StringOp>) -> bool {
    let (store, _path) = open_store(4);
    let mut model: HashMap<u8, Vec<u8>> = HashMap::new();

    for op in &ops {
        match op {
            StringOp::Put(k, v) => {
                store.put(&[*k], v).unwrap();
                model.insert(*k, v.clone());
            }
            StringOp::Remove(k) => {
                store.remove(&[*k]).unwrap();
                model.remove(k);
            }
            StringOp::FetchRemove(k) => {
                let expected = model.remove(k);
                if store.fetch_remove(&[*k]).unwrap() != expected {
                    return false;
                }
            }
        }
    }

    (0..KEY_SPACE).all(|k| store.get(&[k]).unwrap() == model.get(&k).cloned())
}

/// Invariant 3 (FIFO) and 4 (LIFO): append a random sequence of values under one key, then
/// drain it both ways and check against the expected order.
#[quickcheck]
fn prop_append_drain_order(values: Vec<Vec<u8>>) -> bool {
    let values: Vec<Vec<u8>> = values.into_iter().take(20).collect();
    if values.is_empty() {
        return true;
    }

    let (fifo_store, _fifo_path) = open_store(64);
    for v in &values {
        fifo_store.append(b"k", v).unwrap();
    }
    for expected in &values {
        if fifo_store.pop_first(b"k").unwrap() != Some(expected.clone()) {
            return false;
        }
    }
    if fifo_store.pop_first(b"k").unwrap().is_some() {
        return false;
    }

    let (lifo_store, _lifo_path) = open_store(64);
    for v in &values {
        lifo_store.append(b"k", v).unwrap();
    }
    for expected in values.iter().rev() {
        if lifo_store.pop(b"k").unwrap() != Some(expected.clone()) {
            return false;
        }
    }

    true
}

/// Invariant 5: prepending a sequence and draining with pop_tail yields it back in the
/// original (prepend) order, since prepend pushes to the head and pop_tail drains the
/// opposite end.
#[quickcheck]
fn prop_prepend_pop_tail_symmetry(values: Vec<Vec<u8>>) -> bool {
    let values: Vec<Vec<u8>> = values.into_iter().take(20).collect();
    if values.is_empty() {
        return true;
    }

    let (store, _path) = open_store(64);
    for v in &values {
        store.prepend(b"k", v).unwrap();
    }
    for expected in &values {
        if store.pop(b"k").unwrap() != Some(expected.clone()) {
            return false;
        }
    }
    true
}

/// Invariant 7: overwriting a key with values that all fit within the first write's value
/// band never grows the file past the size it reached after that first write.
#[test]
fn prop_storage_reuse_within_band() {
    let (store, path) = open_store(1024);
    store.put(b"k", &vec![b'a'; 200]).unwrap();
    let size_after_first = std::fs::metadata(&path).unwrap().len();

    for len in [0, 1, 50, 200, 256] {
        store.put(b"k", &vec![b'b'; len]).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() <= size_after_first);
    }
}

/// Invariant 8: any sequence that drains the store back to zero live records truncates the
/// file to exactly `header + index`.
#[quickcheck]
fn prop_truncation_when_empty(ops: Vec<StringOp>) -> bool {
    let (store, path) = open_store(64);
    let empty_size = std::fs::metadata(&path).unwrap().len();
    let mut live: std::collections::HashSet<u8> = std::collections::HashSet::new();

    for op in &ops {
        match op {
            StringOp::Put(k, v) => {
                store.put(&[*k], v).unwrap();
                live.insert(*k);
            }
            StringOp::Remove(k) => {
                store.remove(&[*k]).unwrap();
                live.remove(k);
            }
            StringOp::FetchRemove(k) => {
                store.fetch_remove(&[*k]).unwrap();
                live.remove(k);
            }
        }
    }

    if live.is_empty() {
        std::fs::metadata(&path).unwrap().len() == empty_size
    } else {
        true
    }
}

/// Invariant 10: after `close` and reopening without truncating, every live key survives,
/// driven by a random operation sequence rather than a fixed scenario.
#[quickcheck]
fn prop_persistence_across_reopen(ops: Vec<StringOp>) -> bool {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let mut model: HashMap<u8, Vec<u8>> = HashMap::new();

    {
        let store = FileStore::open(
            &path,
            OpenOptions {
                index_size: 64,
                truncate: true,
            },
        )
        .unwrap();
        for op in &ops {
            match op {
                StringOp::Put(k, v) => {
                    store.put(&[*k], v).unwrap();
                    model.insert(*k, v.clone());
                }
                StringOp::Remove(k) => {
                    store.remove(&[*k]).unwrap();
                    model.remove(k);
                }
                StringOp::FetchRemove(k) => {
                    store.fetch_remove(&[*k]).unwrap();
                    model.remove(k);
                }
            }
        }
        store.close().unwrap();
    }

    let store = FileStore::open(
        &path,
        OpenOptions {
            index_size: 64,
            truncate: false,
        },
    )
    .unwrap();

    (0..KEY_SPACE).all(|k| store.get(&[k]).unwrap() == model.get(&k).cloned())
}
