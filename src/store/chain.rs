/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

/*! The collision-chain iterator: walks the singly-linked chain of records rooted at one
 * index slot. Iterators here are deliberately not `std::iter::Iterator` impls. Each step
 * performs I/O against the shared file and can fail, and the iterator is only ever driven by
 * a `&mut Inner` it doesn't own, so it can't be restarted or used after a mutating call.
 */
use crate::common::{Offset, MAX_KEY_LEN};
use crate::error::Result;
use crate::record::{Address, FieldUpdate, LinkPatch};

use super::Inner;

/// Cursor over a collision chain. Carries a fixed 1024-byte key buffer so each step can
/// decode the visited record's key without allocating.
pub struct ChainIter {
    next: Option<Offset>,
    key_buf: [u8; MAX_KEY_LEN],
}

impl ChainIter {
    pub fn new(head: Option<Offset>) -> Self {
        Self {
            next: head,
            key_buf: [0u8; MAX_KEY_LEN],
        }
    }

    /// Read the next record in the chain, if any, returning its offset, address, and key.
    pub fn next(&mut self, inner: &mut Inner) -> Result<Option<(Offset, Address, &[u8])>> {
        let Some(offset) = self.next else {
            return Ok(None);
        };
        let address = inner.read_live_address(offset)?;
        let key_len = inner.read_key(offset, &address, &mut self.key_buf)?;
        self.next = address.chain_next;
        Ok(Some((offset, address, &self.key_buf[..key_len])))
    }
}

/// The record matching a lookup key, plus enough context to rewrite the chain around it:
/// `prev` is `None` when the match is the chain head (reached directly from the slot), or
/// `Some(offset)` of the record whose `chain_next` points at it otherwise.
#[derive(Debug, Clone, Copy)]
pub struct FoundRecord {
    pub offset: Offset,
    pub address: Address,
    pub prev: Option<Offset>,
}

/// The result of walking a key's home slot looking for a match.
pub struct ChainWalk {
    pub slot_offset: Offset,
    pub found: Option<FoundRecord>,
    /// The last record visited (whether or not a match was found). `None` only when the
    /// slot was empty. Used to append a new chain link when no match exists.
    pub tail: Option<(Offset, Address)>,
}

impl Inner {
    /// Locate `key`'s home slot and walk its collision chain looking for a matching key.
    pub(crate) fn find_in_chain(&mut self, key: &[u8]) -> Result<ChainWalk> {
        let slot_offset = crate::hash::slot_offset(key, self.index_size());
        let head = self.read_slot(slot_offset)?;

        let mut iter = ChainIter::new(head);
        let mut prev: Option<Offset> = None;
        let mut tail: Option<(Offset, Address)> = None;

        while let Some((offset, address, record_key)) = iter.next(self)? {
            if record_key == key {
                return Ok(ChainWalk {
                    slot_offset,
                    found: Some(FoundRecord {
                        offset,
                        address,
                        prev,
                    }),
                    tail: Some((offset, address)),
                });
            }
            tail = Some((offset, address));
            prev = Some(offset);
        }

        Ok(ChainWalk {
            slot_offset,
            found: None,
            tail,
        })
    }

    /// Point whatever referenced `found` (the slot, if it was the chain head, or the
    /// previous record's `chain_next` otherwise) at `target` instead. Used both to unlink a
    /// record (`target = found.address.chain_next`, skipping over it) and to splice in its
    /// replacement (`target = Some(new_offset)`).
    pub(crate) fn relink_chain_predecessor(
        &mut self,
        walk: &ChainWalk,
        found: &FoundRecord,
        target: Option<Offset>,
    ) -> Result<()> {
        match found.prev {
            None => self.write_slot(walk.slot_offset, target),
            Some(prev_offset) => self.update_links(
                prev_offset,
                LinkPatch {
                    chain_next: FieldUpdate::from(target),
                    ..Default::default()
                },
            ),
        }
    }

    /// Thread a brand-new record into the chain a [`ChainWalk`] found no match in: either as
    /// the slot's sole occupant (empty slot) or as the last-visited record's `chain_next`.
    pub(crate) fn link_new_chain_tail(&mut self, walk: &ChainWalk, offset: Offset) -> Result<()> {
        match walk.tail {
            None => self.write_slot(walk.slot_offset, Some(offset)),
            Some((tail_offset, _)) => self.update_links(
                tail_offset,
                LinkPatch {
                    chain_next: FieldUpdate::Set(offset),
                    ..Default::default()
                },
            ),
        }
    }
}
