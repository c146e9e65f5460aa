/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

/*! The list engine: `append`/`prepend`/`pop_tail`/`pop_head`. Lists are doubly-linked chains
 * of the same record type as strings (`RecordType::List`); only the head carries a live
 * `list_end` (tail pointer) and `chain_next` (collision-chain link). Interior and tail
 * nodes carry neither.
 *
 * List nodes are never size-banded: every mutation here either creates a brand-new node or
 * rewrites link fields only, so there's no in-place value rewrite to plan slack for.
 */
use log::trace;

use crate::common::Offset;
use crate::error::Result;
use crate::record::{Address, FieldUpdate, LinkPatch, RecordType};

use super::Inner;

fn singleton_list_address(key: &[u8], value: &[u8], chain_next: Option<Offset>, self_offset: Offset) -> Address {
    Address {
        record_type: RecordType::List,
        chain_next,
        list_next: None,
        list_prev: None,
        list_end: Some(self_offset),
        key_len: key.len() as u16,
        value_len: value.len() as u32,
        max_key_len: key.len() as u16,
        max_value_len: value.len() as u32,
    }
}

fn interior_node_address(key: &[u8], value: &[u8], list_prev: Option<Offset>) -> Address {
    Address {
        record_type: RecordType::List,
        chain_next: None,
        list_next: None,
        list_prev,
        list_end: None,
        key_len: key.len() as u16,
        value_len: value.len() as u32,
        max_key_len: key.len() as u16,
        max_value_len: value.len() as u32,
    }
}

pub(crate) fn append(inner: &mut Inner, key: &[u8], value: &[u8]) -> Result<()> {
    let walk = inner.find_in_chain(key)?;

    match &walk.found {
        None => {
            let offset = inner.file_len()? as u32;
            let address = singleton_list_address(key, value, None, offset);
            inner.write_record(offset, &address, key, value)?;
            inner.link_new_chain_tail(&walk, offset)?;
            inner.inc_ref_count()?;
        }
        Some(found) if found.address.record_type == RecordType::List && found.address.list_end.is_some() => {
            // Non-empty list (including a singleton, whose `list_end` is its own offset):
            // append a new tail node after the current one.
            let old_tail_offset = found.address.list_end.expect("guarded by list_end.is_some() above");
            let new_offset = inner.file_len()? as u32;
            let node = interior_node_address(key, value, Some(old_tail_offset));
            inner.write_record(new_offset, &node, key, value)?;
            inner.update_links(
                old_tail_offset,
                LinkPatch {
                    list_next: FieldUpdate::Set(new_offset),
                    ..Default::default()
                },
            )?;
            inner.update_links(
                found.offset,
                LinkPatch {
                    list_end: FieldUpdate::Set(new_offset),
                    ..Default::default()
                },
            )?;
            inner.inc_ref_count()?;
        }
        Some(found) => {
            // A string, or an emptied-out list head (`list_end == None`), is reinitialized in
            // place as a fresh singleton list head at EOF. One record is replaced by one
            // record, so `ref_count` doesn't move.
            let new_offset = inner.file_len()? as u32;
            let address = singleton_list_address(key, value, found.address.chain_next, new_offset);
            inner.write_record(new_offset, &address, key, value)?;
            inner.relink_chain_predecessor(&walk, found, Some(new_offset))?;
        }
    }

    inner.file.sync_all()?;
    Ok(())
}

pub(crate) fn prepend(inner: &mut Inner, key: &[u8], value: &[u8]) -> Result<()> {
    let walk = inner.find_in_chain(key)?;

    match &walk.found {
        None => {
            let offset = inner.file_len()? as u32;
            let address = singleton_list_address(key, value, None, offset);
            inner.write_record(offset, &address, key, value)?;
            inner.link_new_chain_tail(&walk, offset)?;
            inner.inc_ref_count()?;
        }
        Some(found) if found.address.record_type == RecordType::List && found.address.list_end.is_some() => {
            let old_head_offset = found.offset;
            let tail_offset = found.address.list_end.expect("guarded by list_end.is_some() above");
            let new_offset = inner.file_len()? as u32;
            let new_head = Address {
                record_type: RecordType::List,
                chain_next: found.address.chain_next,
                list_next: Some(old_head_offset),
                list_prev: None,
                list_end: Some(tail_offset),
                key_len: key.len() as u16,
                value_len: value.len() as u32,
                max_key_len: key.len() as u16,
                max_value_len: value.len() as u32,
            };
            inner.write_record(new_offset, &new_head, key, value)?;
            // The old head becomes an interior (or tail, if the list was a singleton) node:
            // only the head carries `list_end`/`chain_next`.
            inner.update_links(
                old_head_offset,
                LinkPatch {
                    chain_next: FieldUpdate::Clear,
                    list_prev: FieldUpdate::Set(new_offset),
                    list_end: FieldUpdate::Clear,
                    ..Default::default()
                },
            )?;
            inner.relink_chain_predecessor(&walk, found, Some(new_offset))?;
            inner.inc_ref_count()?;
        }
        Some(found) => {
            let new_offset = inner.file_len()? as u32;
            let address = singleton_list_address(key, value, found.address.chain_next, new_offset);
            inner.write_record(new_offset, &address, key, value)?;
            inner.relink_chain_predecessor(&walk, found, Some(new_offset))?;
        }
    }

    inner.file.sync_all()?;
    Ok(())
}

pub(crate) fn pop_tail(inner: &mut Inner, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let walk = inner.find_in_chain(key)?;
    let Some(found) = walk.found else {
        return Ok(None);
    };
    if found.address.record_type != RecordType::List {
        return Ok(None);
    }
    let Some(tail_offset) = found.address.list_end else {
        return Ok(None); // empty list
    };

    if tail_offset == found.offset {
        // Singleton: the sole element IS the head. Popping it leaves an empty list head
        // behind (still a live record) rather than deleting the key. That is an intentional
        // asymmetry with `pop_head`'s singleton case, which does delete the key.
        let value = inner.read_value(tail_offset, &found.address)?;
        inner.update_links(
            found.offset,
            LinkPatch {
                list_end: FieldUpdate::Clear,
                ..Default::default()
            },
        )?;
        inner.file.sync_all()?;
        return Ok(Some(value));
    }

    let tail_address = inner.read_live_address(tail_offset)?;
    let value = inner.read_value(tail_offset, &tail_address)?;
    let prev_offset = tail_address
        .list_prev
        .expect("a non-singleton list's tail always has a predecessor");

    if prev_offset == found.offset {
        // Exactly two elements: the predecessor IS the head.
        inner.update_links(
            found.offset,
            LinkPatch {
                list_next: FieldUpdate::Clear,
                list_end: FieldUpdate::Set(prev_offset),
                ..Default::default()
            },
        )?;
    } else {
        inner.update_links(
            prev_offset,
            LinkPatch {
                list_next: FieldUpdate::Clear,
                ..Default::default()
            },
        )?;
        inner.update_links(
            found.offset,
            LinkPatch {
                list_end: FieldUpdate::Set(prev_offset),
                ..Default::default()
            },
        )?;
    }

    inner.dec_ref_count()?;
    inner.maybe_truncate_tail(tail_offset, tail_address.record_len())?;
    inner.file.sync_all()?;
    Ok(Some(value))
}

pub(crate) fn pop_head(inner: &mut Inner, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let walk = inner.find_in_chain(key)?;
    let Some(found) = walk.found else {
        return Ok(None);
    };
    if found.address.record_type != RecordType::List || found.address.list_end.is_none() {
        return Ok(None);
    }

    let value = inner.read_value(found.offset, &found.address)?;

    match found.address.list_next {
        Some(successor_offset) => {
            // Promote the successor: it inherits `list_end` and `chain_next` from the old
            // head so the collision chain is never broken by a pop.
            inner.update_links(
                successor_offset,
                LinkPatch {
                    list_prev: FieldUpdate::Clear,
                    list_end: FieldUpdate::from(found.address.list_end),
                    chain_next: FieldUpdate::from(found.address.chain_next),
                    ..Default::default()
                },
            )?;
            inner.relink_chain_predecessor(&walk, &found, Some(successor_offset))?;
        }
        None => {
            // Singleton: the key disappears entirely (no empty-list placeholder, unlike
            // `pop_tail`'s singleton case).
            trace!("pop_head draining last element of list at key (offset {})", found.offset);
            inner.relink_chain_predecessor(&walk, &found, found.address.chain_next)?;
        }
    }

    inner.dec_ref_count()?;
    inner.maybe_truncate_tail(found.offset, found.address.record_len())?;
    inner.file.sync_all()?;
    Ok(Some(value))
}

/// Decrement `ref_count` once per node in the list rooted at `head_offset` (the head plus
/// every record reachable via `list_next`), without touching any chain/slot pointer. Callers
/// are responsible for unlinking the head from the collision chain themselves.
pub(crate) fn dealloc_list_nodes(inner: &mut Inner, head_offset: Offset, head_address: Address) -> Result<()> {
    trace!("deallocating list rooted at offset {head_offset}");
    let mut next = head_address.list_next;
    inner.dec_ref_count()?;
    while let Some(offset) = next {
        let address = inner.read_live_address(offset)?;
        next = address.list_next;
        inner.dec_ref_count()?;
    }
    Ok(())
}
