//! Little-endian field readers and string/time decoding shared by the parsers.

use crate::error::{RegfError, RegfResult};
use chrono::{DateTime, Utc};

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_DELTA_SECS: i64 = 11_644_473_600;

pub(crate) fn slice(data: &[u8], offset: usize, len: usize) -> RegfResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(RegfError::Truncated {
            offset,
            needed: len,
            available: data.len().saturating_sub(offset),
        })
}

pub(crate) fn le_u16(data: &[u8], offset: usize) -> RegfResult<u16> {
    let b = slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn le_u32(data: &[u8], offset: usize) -> RegfResult<u32> {
    let b = slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn le_i32(data: &[u8], offset: usize) -> RegfResult<i32> {
    Ok(le_u32(data, offset)? as i32)
}

pub(crate) fn le_u64(data: &[u8], offset: usize) -> RegfResult<u64> {
    let b = slice(data, offset, 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(b);
    Ok(u64::from_le_bytes(arr))
}

pub(crate) fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    if let Some(dst) = data.get_mut(offset..offset + 4) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

/// Decode a UTF-16LE string from raw bytes, stopping at first null or end.
pub(crate) fn read_utf16le_string(data: &[u8]) -> String {
    let chars: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&chars)
}

/// Convert a Windows FILETIME (100ns ticks since 1601) to UTC.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    let secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DELTA_SECS;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}
