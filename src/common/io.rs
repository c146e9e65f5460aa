/*
 * Copyright (c) 2024 filekv contributors.
 * Licensed under the MIT OR Apache-2.0 license, at your option.
 */

/// Utility functions for reading and writing fixed-width little-endian integers in a byte
/// slice, plus the "0 = none" optional-offset encoding used throughout the record format.
/// A 32-bit offset of 0 always means "no pointer": every live record lives past the header
/// and index region, so 0 can never be a valid record offset.
use crate::error::{Error, Result};

/// Read an unsigned 8-bit integer at the specified offset.
#[inline]
pub fn read_u8(array: &[u8], offset: usize) -> Result<u8> {
    bounds_check(array, offset, 1)?;
    Ok(array[offset])
}

/// Write an unsigned 8-bit integer at the specified offset.
#[inline]
pub fn write_u8(array: &mut [u8], offset: usize, value: u8) -> Result<()> {
    bounds_check(array, offset, 1)?;
    array[offset] = value;
    Ok(())
}

/// Read an unsigned 16-bit integer at the specified offset.
#[inline]
pub fn read_u16(array: &[u8], offset: usize) -> Result<u16> {
    bounds_check(array, offset, 2)?;
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&array[offset..offset + 2]);
    Ok(u16::from_le_bytes(bytes))
}

/// Write an unsigned 16-bit integer at the specified offset. Any existing value is
/// overwritten.
#[inline]
pub fn write_u16(array: &mut [u8], offset: usize, value: u16) -> Result<()> {
    bounds_check(array, offset, 2)?;
    array[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Read an unsigned 32-bit integer at the specified offset.
#[inline]
pub fn read_u32(array: &[u8], offset: usize) -> Result<u32> {
    bounds_check(array, offset, 4)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&array[offset..offset + 4]);
    Ok(u32::from_le_bytes(bytes))
}

/// Write an unsigned 32-bit integer at the specified offset. Any existing value is
/// overwritten.
#[inline]
pub fn write_u32(array: &mut [u8], offset: usize, value: u32) -> Result<()> {
    bounds_check(array, offset, 4)?;
    array[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Read an optional 32-bit file offset: a stored value of 0 decodes to `None`.
#[inline]
pub fn read_offset(array: &[u8], offset: usize) -> Result<Option<u32>> {
    let value = read_u32(array, offset)?;
    Ok(if value == 0 { None } else { Some(value) })
}

/// Write an optional 32-bit file offset: `None` encodes as 0.
#[inline]
pub fn write_offset(array: &mut [u8], offset: usize, value: Option<u32>) -> Result<()> {
    write_u32(array, offset, value.unwrap_or(0))
}

#[inline]
fn bounds_check(array: &[u8], offset: usize, width: usize) -> Result<()> {
    if offset + width > array.len() {
        return Err(Error::FileCorrupted(format!(
            "read/write of {} bytes at offset {} overflows a buffer of length {}",
            width,
            offset,
            array.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_u32_roundtrip() {
        let mut array = [0u8; 64];
        write_u32(&mut array, 21, 31415926).unwrap();
        assert_eq!(read_u32(&array, 21).unwrap(), 31415926);
    }

    #[test]
    fn test_read_write_u32_overflow() {
        let mut array = [0u8; 32];
        assert!(write_u32(&mut array, 28, 1).is_ok());
        assert!(write_u32(&mut array, 29, 1).is_err());
        assert!(read_u32(&array, 29).is_err());
    }

    #[test]
    fn test_read_write_u16_roundtrip() {
        let mut array = [0u8; 16];
        write_u16(&mut array, 3, 4321).unwrap();
        assert_eq!(read_u16(&array, 3).unwrap(), 4321);
    }

    #[test]
    fn test_offset_none_roundtrip() {
        let mut array = [0u8; 8];
        write_offset(&mut array, 0, None).unwrap();
        assert_eq!(read_offset(&array, 0).unwrap(), None);
    }

    #[test]
    fn test_offset_some_roundtrip() {
        let mut array = [0u8; 8];
        write_offset(&mut array, 0, Some(4096)).unwrap();
        assert_eq!(read_offset(&array, 0).unwrap(), Some(4096));
    }
}
