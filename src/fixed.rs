//! Little-endian, variable-width integer helpers shared by every component
//! that reads or writes an `offsetSize`- or `lengthSize`-wide field.
//!
//! HDF5 v0 stores addresses and lengths in a width chosen once, at the
//! superblock, and reused everywhere else in the file. The "undefined"
//! sentinel (all bytes `0xFF`) means "not present" regardless of width.

use crate::error::Error;
use std::io::Write;

/// The bit pattern meaning "not present" for a field of the given width.
pub fn undefined(width: u8) -> u64 {
    match width {
        2 => 0xFFFF,
        4 => 0xFFFF_FFFF,
        8 => 0xFFFF_FFFF_FFFF_FFFF,
        _ => panic!("unsupported field width {}", width),
    }
}

pub fn is_undefined(width: u8, value: u64) -> bool {
    value == undefined(width)
}

/// Reads a little-endian, variable-width unsigned integer out of `bytes`.
pub fn read(width: u8, bytes: &[u8]) -> Result<u64, Error> {
    if bytes.len() < width as usize {
        return Err(Error::bounds("not enough bytes for a fixed-width field", None));
    }
    let mut buf = [0u8; 8];
    buf[..width as usize].copy_from_slice(&bytes[..width as usize]);
    Ok(u64::from_le_bytes(buf))
}

/// Writes `value` as a little-endian, variable-width unsigned integer.
pub fn write<W: Write>(w: &mut W, width: u8, value: u64) -> Result<(), Error> {
    let full = value.to_le_bytes();
    match width {
        2 | 4 | 8 => w.write_all(&full[..width as usize]).map_err(Error::from),
        _ => panic!("unsupported field width {}", width),
    }
}

pub fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Padding, in bytes, to carry a length up to the next multiple of 8.
pub fn pad8(len: usize) -> usize {
    let rem = len % 8;
    if rem == 0 {
        0
    } else {
        8 - rem
    }
}
