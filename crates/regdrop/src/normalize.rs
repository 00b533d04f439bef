//! Typed value normalization: raw hex payload -> display string.
//!
//! | code | decode                                   | fallback       |
//! |------|------------------------------------------|----------------|
//! | 0x2  | UTF-16LE, trailing NULs stripped         | never          |
//! | 0x4  | i32 little-endian, decimal               | length != 4    |
//! | 0x5  | i32 big-endian, decimal                  | length != 4    |
//! | 0x7  | UTF-16LE, NUL-split, empties dropped, `\n`-joined | never |
//! | 0xb  | i64 little-endian, decimal               | length != 8    |
//! | else | -                                        | always         |
//!
//! The fallback is standard base64 of the payload bytes. Only these five
//! codes are decoded; every other code, REG_SZ (0x1) included, is base64.

use crate::engine::{RawRecord, RecordKind};
use crate::error::{RegdropError, RegdropResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regf::reg_types::{REG_DWORD, REG_DWORD_BIG_ENDIAN, REG_EXPAND_SZ, REG_MULTI_SZ, REG_QWORD};
use tracing::warn;

/// A record whose payload has been rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub kind: RecordKind,
    pub active: bool,
    pub offset: u64,
    pub path: Vec<String>,
    pub name: String,
    pub data_type: Option<u32>,
    pub value: String,
    pub last_write_time: Option<String>,
}

/// Parse a space-separated hex byte string.
///
/// Input shorter than two characters is an empty payload. Empty tokens from
/// repeated or trailing spaces are ignored.
pub fn parse_hex_bytes(raw: &str) -> RegdropResult<Vec<u8>> {
    if raw.len() < 2 {
        return Ok(Vec::new());
    }
    raw.split(' ')
        .filter(|t| !t.is_empty())
        .map(|t| {
            u8::from_str_radix(t, 16).map_err(|_| RegdropError::MalformedHex {
                token: t.to_string(),
            })
        })
        .collect()
}

/// UTF-16LE decode; a dangling odd byte becomes U+FFFD.
fn utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let mut text = String::from_utf16_lossy(&units);
    if data.len() % 2 == 1 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

fn base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Render `data` according to `data_type`. Never fails.
pub fn decode_value(data_type: u32, data: &[u8]) -> String {
    match data_type {
        REG_EXPAND_SZ => utf16le(data).trim_end_matches('\0').to_string(),
        REG_DWORD => match <[u8; 4]>::try_from(data) {
            Ok(b) => i32::from_le_bytes(b).to_string(),
            Err(_) => base64(data),
        },
        REG_DWORD_BIG_ENDIAN => match <[u8; 4]>::try_from(data) {
            Ok(b) => i32::from_be_bytes(b).to_string(),
            Err(_) => base64(data),
        },
        REG_MULTI_SZ => utf16le(data)
            .split('\0')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        REG_QWORD => match <[u8; 8]>::try_from(data) {
            Ok(b) => i64::from_le_bytes(b).to_string(),
            Err(_) => base64(data),
        },
        _ => base64(data),
    }
}

/// Rewrite a value record's payload into its display string; keys pass through.
///
/// A payload with a malformed hex token degrades to base64 of the payload
/// text itself, and only that record is affected.
pub fn normalize_record(record: RawRecord) -> NormalizedRecord {
    let value = match (record.kind, record.data_type) {
        (RecordKind::Value, data_type) => match parse_hex_bytes(&record.raw_value) {
            Ok(bytes) => decode_value(data_type.unwrap_or(u32::MAX), &bytes),
            Err(e) => {
                warn!(
                    "normalize: {} at {:#x} ({}): {}",
                    record.path.join("\\"),
                    record.offset,
                    record.name,
                    e
                );
                base64(record.raw_value.as_bytes())
            }
        },
        (RecordKind::Key, _) => record.raw_value,
    };

    NormalizedRecord {
        kind: record.kind,
        active: record.active,
        offset: record.offset,
        path: record.path,
        name: record.name,
        data_type: record.data_type,
        value,
        last_write_time: record.last_write_time,
    }
}

pub fn normalize_all(records: Vec<RawRecord>) -> Vec<NormalizedRecord> {
    records.into_iter().map(normalize_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{key, value};
    use regf::hex_bytes;

    fn utf16_hex(s: &str) -> String {
        let bytes: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        hex_bytes(&bytes)
    }

    fn norm(data_type: u32, raw: &str) -> String {
        normalize_record(value(&["ROOT"], "v", data_type, raw)).value
    }

    #[test]
    fn test_dword_little_endian() {
        assert_eq!(norm(0x4, "01 00 00 00"), "1");
        assert_eq!(norm(0x4, "ff ff ff ff"), "-1");
    }

    #[test]
    fn test_dword_big_endian() {
        assert_eq!(norm(0x5, "00 00 00 01"), "1");
        assert_eq!(norm(0x5, "80 00 00 00"), i32::MIN.to_string());
    }

    #[test]
    fn test_expand_sz_strips_trailing_nul() {
        assert_eq!(norm(0x2, &utf16_hex("abc\0")), "abc");
        assert_eq!(norm(0x2, &utf16_hex("%SystemRoot%\0\0")), "%SystemRoot%");
        assert_eq!(norm(0x2, ""), "");
    }

    #[test]
    fn test_multi_sz_joins_segments() {
        assert_eq!(norm(0x7, &utf16_hex("a\0b\0")), "a\nb");
        assert_eq!(norm(0x7, &utf16_hex("one\0\0two\0\0")), "one\ntwo");
        assert_eq!(norm(0x7, ""), "");
    }

    #[test]
    fn test_qword() {
        assert_eq!(norm(0xb, "00 01 00 00 00 00 00 00"), "256");
        assert_eq!(norm(0xb, "ff ff ff ff ff ff ff ff"), "-1");
    }

    #[test]
    fn test_decoded_codes_match_windows_values() {
        assert_eq!(
            [REG_EXPAND_SZ, REG_DWORD, REG_DWORD_BIG_ENDIAN, REG_MULTI_SZ, REG_QWORD],
            [0x2, 0x4, 0x5, 0x7, 0xb]
        );
    }

    #[test]
    fn test_unknown_type_is_base64() {
        assert_eq!(norm(0x9f, "ff 00 ff"), "/wD/");
        assert_eq!(norm(0x3, "de ad be ef"), "3q2+7w==");
    }

    #[test]
    fn test_reg_sz_code_is_base64() {
        assert_eq!(norm(0x1, &utf16_hex("hi")), BASE64.encode([b'h', 0, b'i', 0]));
    }

    #[test]
    fn test_wrong_width_falls_back() {
        assert_eq!(norm(0x4, "01 02 03"), BASE64.encode([1u8, 2, 3]));
        assert_eq!(norm(0x5, "01 02 03 04 05"), BASE64.encode([1u8, 2, 3, 4, 5]));
        assert_eq!(norm(0xb, "01 00 00 00"), BASE64.encode([1u8, 0, 0, 0]));
        assert_eq!(norm(0x4, ""), "");
    }

    #[test]
    fn test_odd_length_string_does_not_panic() {
        assert_eq!(norm(0x2, "61 00 62"), "a\u{FFFD}");
    }

    #[test]
    fn test_total_over_lengths_and_codes() {
        for code in [0u32, 1, 2, 3, 4, 5, 6, 7, 8, 0xb, 0x9f, u32::MAX] {
            for len in 0..20usize {
                let data: Vec<u8> = (0..len).map(|i| (i * 37) as u8).collect();
                let _ = decode_value(code, &data);
            }
        }
    }

    #[test]
    fn test_parse_hex_bytes_edges() {
        assert_eq!(parse_hex_bytes("").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_hex_bytes("f").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_hex_bytes("0a FF").unwrap(), vec![0x0a, 0xff]);
        assert_eq!(parse_hex_bytes("01  02 ").unwrap(), vec![1, 2]);
        assert!(matches!(
            parse_hex_bytes("01 zz"),
            Err(RegdropError::MalformedHex { token }) if token == "zz"
        ));
    }

    #[test]
    fn test_malformed_token_degrades_to_base64_of_text() {
        assert_eq!(norm(0x4, "01 zz 00 00"), BASE64.encode("01 zz 00 00"));
    }

    #[test]
    fn test_keys_pass_through() {
        let k = key(&["ROOT", "Software"]);
        let n = normalize_record(k.clone());
        assert_eq!(n.kind, RecordKind::Key);
        assert_eq!(n.value, "");
        assert_eq!(n.path, k.path);
        assert_eq!(n.last_write_time, k.last_write_time);
    }

    #[test]
    fn test_only_value_string_changes() {
        let raw = value(&["ROOT", "Control"], "Start", 0x4, "02 00 00 00");
        let n = normalize_record(raw.clone());
        assert_eq!(n.value, "2");
        assert_eq!(n.offset, raw.offset);
        assert_eq!(n.name, raw.name);
        assert_eq!(n.data_type, raw.data_type);
        assert_eq!(n.active, raw.active);
    }
}
