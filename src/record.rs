/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

/*! The on-disk record: a fixed 29-byte address followed by a variable-length key/value tail.
 *
 * One layout serves both strings and list nodes. The address fields occupy fixed byte
 * offsets so that a single field can be rewritten in place without touching the rest of the
 * record:
 *
 * ```text
 * 0:  type           (1 byte)
 * 1:  chain_next     (4 bytes)
 * 5:  list_next      (4 bytes)
 * 9:  list_prev      (4 bytes)
 * 13: list_end       (4 bytes)
 * 17: key_len        (2 bytes)
 * 19: value_len      (4 bytes)
 * 23: max_key_len     (2 bytes)
 * 25: max_value_len   (4 bytes)
 * ```
 */
use crate::common::io::{read_offset, read_u16, read_u32, read_u8, write_offset, write_u16, write_u32, write_u8};
use crate::common::{Offset, ADDRESS_LEN};
use crate::error::{Error, Result};

const TYPE_OFF: usize = 0;
const CHAIN_NEXT_OFF: usize = 1;
const LIST_NEXT_OFF: usize = 5;
const LIST_PREV_OFF: usize = 9;
const LIST_END_OFF: usize = 13;
const KEY_LEN_OFF: usize = 17;
const VALUE_LEN_OFF: usize = 19;
const MAX_KEY_LEN_OFF: usize = 23;
const MAX_VALUE_LEN_OFF: usize = 25;

/// Tag distinguishing a string record from a list node. Both share the `Address` layout; a
/// runtime tag keeps the dispatch between the string and list engines explicit rather than
/// leaning on generics for something that is really just two code paths over one struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Str,
    List,
}

impl RecordType {
    fn to_byte(self) -> u8 {
        match self {
            RecordType::Str => 0,
            RecordType::List => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(RecordType::Str),
            1 => Ok(RecordType::List),
            other => Err(Error::FileCorrupted(format!(
                "record type tag {other} is outside {{0, 1}}"
            ))),
        }
    }
}

/// The fixed 29-byte address portion of a record. The key/value tail is read and written
/// separately, directly against the open file, so it never needs to pass through this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub record_type: RecordType,
    pub chain_next: Option<Offset>,
    pub list_next: Option<Offset>,
    pub list_prev: Option<Offset>,
    pub list_end: Option<Offset>,
    pub key_len: u16,
    pub value_len: u32,
    pub max_key_len: u16,
    pub max_value_len: u32,
}

impl Address {
    /// Total length of the record this address describes, address plus key/value tail.
    pub fn record_len(&self) -> u32 {
        ADDRESS_LEN + self.max_key_len as u32 + self.max_value_len
    }

    pub fn to_bytes(self) -> [u8; ADDRESS_LEN as usize] {
        let mut buf = [0u8; ADDRESS_LEN as usize];
        write_u8(&mut buf, TYPE_OFF, self.record_type.to_byte()).unwrap();
        write_offset(&mut buf, CHAIN_NEXT_OFF, self.chain_next).unwrap();
        write_offset(&mut buf, LIST_NEXT_OFF, self.list_next).unwrap();
        write_offset(&mut buf, LIST_PREV_OFF, self.list_prev).unwrap();
        write_offset(&mut buf, LIST_END_OFF, self.list_end).unwrap();
        write_u16(&mut buf, KEY_LEN_OFF, self.key_len).unwrap();
        write_u32(&mut buf, VALUE_LEN_OFF, self.value_len).unwrap();
        write_u16(&mut buf, MAX_KEY_LEN_OFF, self.max_key_len).unwrap();
        write_u32(&mut buf, MAX_VALUE_LEN_OFF, self.max_value_len).unwrap();
        buf
    }

    /// Rewrite just the `value_len` field of an already-encoded 29-byte address buffer,
    /// leaving every other field untouched. Used for an in-place value rewrite that stays
    /// within the record's existing `max_value_len` band.
    pub(crate) fn write_value_len(buf: &mut [u8], value_len: u32) -> Result<()> {
        write_u32(buf, VALUE_LEN_OFF, value_len)
    }

    /// Decode an address from a 29-byte buffer. Returns `Ok(None)` if every byte is zero,
    /// which is how an as-yet-unwritten (or freed-and-never-reused) slot reads back.
    pub fn from_bytes(buf: &[u8]) -> Result<Option<Address>> {
        if buf.len() != ADDRESS_LEN as usize {
            return Err(Error::FileCorrupted(format!(
                "expected a {}-byte address, got {}",
                ADDRESS_LEN,
                buf.len()
            )));
        }
        if buf.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let record_type = RecordType::from_byte(read_u8(buf, TYPE_OFF)?)?;
        let chain_next = read_offset(buf, CHAIN_NEXT_OFF)?;
        let list_next = read_offset(buf, LIST_NEXT_OFF)?;
        let list_prev = read_offset(buf, LIST_PREV_OFF)?;
        let list_end = read_offset(buf, LIST_END_OFF)?;
        let key_len = read_u16(buf, KEY_LEN_OFF)?;
        let value_len = read_u32(buf, VALUE_LEN_OFF)?;
        let max_key_len = read_u16(buf, MAX_KEY_LEN_OFF)?;
        let max_value_len = read_u32(buf, MAX_VALUE_LEN_OFF)?;

        if key_len > max_key_len {
            return Err(Error::FileCorrupted(format!(
                "key_len {key_len} exceeds max_key_len {max_key_len}"
            )));
        }
        if value_len > max_value_len {
            return Err(Error::FileCorrupted(format!(
                "value_len {value_len} exceeds max_value_len {max_value_len}"
            )));
        }

        Ok(Some(Address {
            record_type,
            chain_next,
            list_next,
            list_prev,
            list_end,
            key_len,
            value_len,
            max_key_len,
            max_value_len,
        }))
    }
}

/// Distinguishes "leave this field alone" from "clear it to none" from "set it to a specific
/// offset" when rewriting the four linkage pointers (and the type tag) of an existing record
/// without touching its key/value tail. Modeling this as `Option<Option<Offset>>` would make
/// "leave alone" and "clear" easy to confuse at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldUpdate {
    #[default]
    Keep,
    Clear,
    Set(Offset),
}

impl FieldUpdate {
    fn apply(self, buf: &mut [u8], offset: usize) -> Result<()> {
        match self {
            FieldUpdate::Keep => Ok(()),
            FieldUpdate::Clear => write_offset(buf, offset, None),
            FieldUpdate::Set(value) => write_offset(buf, offset, Some(value)),
        }
    }
}

/// An optional offset read off a live record translates directly into "set" or "clear" when
/// it's copied onto another record's link field (e.g. promoting a list successor's
/// `chain_next` to whatever the old head carried).
impl From<Option<Offset>> for FieldUpdate {
    fn from(value: Option<Offset>) -> Self {
        match value {
            Some(offset) => FieldUpdate::Set(offset),
            None => FieldUpdate::Clear,
        }
    }
}

/// A selective rewrite of a record's address fields: the type tag and the four linkage
/// pointers, each independently updatable. The key/value tail and the `*_len` fields are
/// never touched by this; those go through [`Address::to_bytes`] as part of a full record
/// write instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkPatch {
    pub record_type: Option<RecordType>,
    pub chain_next: FieldUpdate,
    pub list_next: FieldUpdate,
    pub list_prev: FieldUpdate,
    pub list_end: FieldUpdate,
}

impl LinkPatch {
    pub fn apply(self, buf: &mut [u8]) -> Result<()> {
        if let Some(record_type) = self.record_type {
            write_u8(buf, TYPE_OFF, record_type.to_byte())?;
        }
        self.chain_next.apply(buf, CHAIN_NEXT_OFF)?;
        self.list_next.apply(buf, LIST_NEXT_OFF)?;
        self.list_prev.apply(buf, LIST_PREV_OFF)?;
        self.list_end.apply(buf, LIST_END_OFF)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Address {
        Address {
            record_type: RecordType::List,
            chain_next: Some(100),
            list_next: None,
            list_prev: Some(42),
            list_end: Some(900),
            key_len: 3,
            value_len: 11,
            max_key_len: 3,
            max_value_len: 256,
        }
    }

    #[test]
    fn test_address_roundtrip() {
        let addr = sample();
        let bytes = addr.to_bytes();
        let decoded = Address::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn test_all_zero_decodes_to_none() {
        let bytes = [0u8; ADDRESS_LEN as usize];
        assert_eq!(Address::from_bytes(&bytes).unwrap(), None);
    }

    #[test]
    fn test_invalid_type_tag_is_corruption() {
        let mut bytes = sample().to_bytes();
        bytes[TYPE_OFF] = 2;
        assert!(Address::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_key_len_past_max_is_corruption() {
        let mut bytes = sample().to_bytes();
        write_u16(&mut bytes, MAX_KEY_LEN_OFF, 1).unwrap();
        assert!(Address::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_link_patch_selective_update() {
        let addr = sample();
        let mut bytes = addr.to_bytes();

        let patch = LinkPatch {
            list_end: FieldUpdate::Clear,
            chain_next: FieldUpdate::Set(55),
            ..Default::default()
        };
        patch.apply(&mut bytes).unwrap();

        let decoded = Address::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(decoded.list_end, None);
        assert_eq!(decoded.chain_next, Some(55));
        // Untouched fields survive the selective rewrite.
        assert_eq!(decoded.list_prev, addr.list_prev);
        assert_eq!(decoded.key_len, addr.key_len);
        assert_eq!(decoded.value_len, addr.value_len);
    }
}
