//! Transaction log replay (new format, Windows 8.1+).
//!
//! Log file layout:
//! ```text
//! +0x000  Base block copy (512 bytes, "regf", own checksum)
//! +0x200  Log entries, each a multiple of 512 bytes:
//!   +0x00  Signature "HvLE"
//!   +0x04  Size (u32)
//!   +0x08  Flags (u32)
//!   +0x0C  SequenceNumber (u32)
//!   +0x10  HiveBinsDataSize (u32)
//!   +0x14  DirtyPagesCount (u32)
//!   +0x18  Hash1 (u64), Marvin32 of bytes [0x28, Size)
//!   +0x20  Hash2 (u64), Marvin32 of bytes [0x00, 0x20)
//!   +0x28  Dirty page references: DirtyPagesCount x (Offset u32, Size u32)
//!          followed by the page data, in reference order
//! ```
//! Legacy logs carry a "DIRT" vector at 0x200 instead and are not replayed.

use crate::base_block::{
    rewrite_checksum, set_hive_bins_data_size, set_sequence_numbers, BaseBlock, BASE_BLOCK_SIZE,
};
use crate::error::{RegfError, RegfResult};
use crate::marvin::{marvin32, LOG_ENTRY_SEED};
use crate::util::{le_u32, le_u64, slice};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOG_BASE_BLOCK_SIZE: usize = 512;
const ENTRY_HEADER_SIZE: usize = 0x28;
const ENTRY_ALIGNMENT: usize = 512;
const HVLE_SIGNATURE: &[u8; 4] = b"HvLE";
const DIRT_SIGNATURE: &[u8; 4] = b"DIRT";
const HBIN_ALIGNMENT: u32 = 4096;
/// Largest hive bins data size a log entry may announce (256 MiB).
const MAX_HIVE_BINS_DATA_SIZE: u32 = 0x1000_0000;

/// A dirty page carried by a log entry.
#[derive(Debug, Clone)]
pub struct DirtyPage {
    /// Offset relative to the hive bins data.
    pub offset: u32,
    pub data: Vec<u8>,
}

/// One validated log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub sequence: u32,
    pub hive_bins_data_size: u32,
    pub pages: Vec<DirtyPage>,
}

/// Parse every valid entry in a transaction log.
///
/// Reading stops quietly at the first entry without an `HvLE` signature or
/// with mismatching hashes: that marks the end of the valid region. A
/// structurally impossible entry is an error.
pub fn parse_log(name: &str, data: &[u8]) -> RegfResult<Vec<LogEntry>> {
    if data.len() < LOG_BASE_BLOCK_SIZE {
        return Err(RegfError::log(name, format!("file too short ({} bytes)", data.len())));
    }
    let base = BaseBlock::parse(&data[..LOG_BASE_BLOCK_SIZE])
        .map_err(|e| RegfError::log(name, format!("base block: {}", e)))?;
    if !base.is_checksum_valid() {
        return Err(RegfError::log(name, "base block checksum mismatch"));
    }
    if data.get(LOG_BASE_BLOCK_SIZE..LOG_BASE_BLOCK_SIZE + 4) == Some(&DIRT_SIGNATURE[..]) {
        return Err(RegfError::UnsupportedLogFormat(name.to_string()));
    }

    let mut entries = Vec::new();
    let mut off = LOG_BASE_BLOCK_SIZE;
    while off + ENTRY_HEADER_SIZE <= data.len() {
        if &data[off..off + 4] != HVLE_SIGNATURE {
            break;
        }
        let size = le_u32(data, off + 0x04)? as usize;
        if size < ENTRY_HEADER_SIZE || size % ENTRY_ALIGNMENT != 0 || off + size > data.len() {
            return Err(RegfError::log(
                name,
                format!("entry at {:#x} has invalid size {:#x}", off, size),
            ));
        }
        let entry = &data[off..off + size];

        let hash1 = le_u64(entry, 0x18)?;
        let hash2 = le_u64(entry, 0x20)?;
        if marvin32(&entry[..0x20], LOG_ENTRY_SEED) != hash2
            || marvin32(&entry[ENTRY_HEADER_SIZE..], LOG_ENTRY_SEED) != hash1
        {
            debug!("regf: {}: entry at {:#x} fails hash check, end of log", name, off);
            break;
        }

        entries.push(parse_entry(name, entry, off)?);
        off += size;
    }

    debug!("regf: {}: {} valid log entries", name, entries.len());
    Ok(entries)
}

fn parse_entry(name: &str, entry: &[u8], off: usize) -> RegfResult<LogEntry> {
    let sequence = le_u32(entry, 0x0C)?;
    let hive_bins_data_size = le_u32(entry, 0x10)?;
    let page_count = le_u32(entry, 0x14)? as usize;

    let corrupt = |msg: &str| RegfError::log(name, format!("entry at {:#x}: {}", off, msg));

    if hive_bins_data_size % HBIN_ALIGNMENT != 0 {
        return Err(corrupt("hive bins data size is not 4096-aligned"));
    }
    if hive_bins_data_size > MAX_HIVE_BINS_DATA_SIZE {
        return Err(corrupt("hive bins data size exceeds limit"));
    }

    let refs_end = page_count
        .checked_mul(8)
        .and_then(|n| n.checked_add(ENTRY_HEADER_SIZE))
        .filter(|&end| end <= entry.len())
        .ok_or_else(|| corrupt("dirty page references overflow entry"))?;

    let mut pages = Vec::with_capacity(page_count);
    let mut cursor = refs_end;
    for i in 0..page_count {
        let ref_off = ENTRY_HEADER_SIZE + i * 8;
        let offset = le_u32(entry, ref_off)?;
        let size = le_u32(entry, ref_off + 4)? as usize;
        let page = slice(entry, cursor, size).map_err(|_| corrupt("page data overflows entry"))?;
        if offset as u64 + size as u64 > hive_bins_data_size as u64 {
            return Err(corrupt("dirty page lies beyond hive bins data size"));
        }
        pages.push(DirtyPage {
            offset,
            data: page.to_vec(),
        });
        cursor += size;
    }

    Ok(LogEntry {
        sequence,
        hive_bins_data_size,
        pages,
    })
}

fn log_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Apply transaction logs to a hive image and return the recovered image.
///
/// Entries from all logs are merged and applied in sequence order starting
/// at the hive's secondary sequence number. With `strict`, any log that
/// cannot be read or parsed, or a hive no entry can bring forward, is an
/// error; otherwise such logs are skipped with a warning.
pub fn replay_logs(hive: &[u8], logs: &[PathBuf], strict: bool) -> RegfResult<Vec<u8>> {
    let base = BaseBlock::parse(hive)?;

    let mut entries = Vec::new();
    for path in logs {
        let name = log_name(path);
        let parsed = std::fs::read(path)
            .map_err(|e| RegfError::log(&name, format!("read failed: {}", e)))
            .and_then(|data| parse_log(&name, &data));
        match parsed {
            Ok(found) => entries.extend(found),
            Err(e) if strict => return Err(e),
            Err(e) => warn!("regf: skipping {}: {}", name, e),
        }
    }

    entries.sort_by_key(|e| e.sequence);
    entries.dedup_by_key(|e| e.sequence);

    let mut image = hive.to_vec();
    let mut expected = base.secondary_sequence;
    let mut applied = 0usize;
    let mut bins_size = base.hive_bins_data_size;

    for entry in entries.iter().filter(|e| e.sequence >= base.secondary_sequence) {
        if entry.sequence != expected {
            debug!(
                "regf: sequence gap (expected {}, found {}), stopping replay",
                expected, entry.sequence
            );
            break;
        }
        bins_size = entry.hive_bins_data_size;
        let needed = BASE_BLOCK_SIZE + bins_size as usize;
        if image.len() < needed {
            image.resize(needed, 0);
        }
        for page in &entry.pages {
            let start = BASE_BLOCK_SIZE + page.offset as usize;
            image[start..start + page.data.len()].copy_from_slice(&page.data);
        }
        applied += 1;
        expected = expected.wrapping_add(1);
    }

    if applied == 0 {
        let msg = format!(
            "no log entry continues sequence number {}",
            base.secondary_sequence
        );
        if strict {
            return Err(RegfError::log("transaction logs", msg));
        }
        warn!("regf: {}; hive left unchanged", msg);
        return Ok(image);
    }

    image.truncate(BASE_BLOCK_SIZE + bins_size as usize);
    set_sequence_numbers(&mut image, expected, expected);
    set_hive_bins_data_size(&mut image, bins_size);
    rewrite_checksum(&mut image)?;

    info!(
        "regf: replayed {} log entries, hive now at sequence {}",
        applied, expected
    );
    Ok(image)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn base_block(primary: u32, secondary: u32, bins_size: u32, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[0..4].copy_from_slice(b"regf");
        set_sequence_numbers(&mut data, primary, secondary);
        data[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
        data[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
        data[0x24..0x28].copy_from_slice(&0x20u32.to_le_bytes());
        set_hive_bins_data_size(&mut data, bins_size);
        rewrite_checksum(&mut data).unwrap();
        data
    }

    pub(crate) fn log_entry(sequence: u32, bins_size: u32, pages: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let payload: usize = pages.iter().map(|(_, d)| d.len()).sum();
        let raw = ENTRY_HEADER_SIZE + pages.len() * 8 + payload;
        let size = (raw + ENTRY_ALIGNMENT - 1) / ENTRY_ALIGNMENT * ENTRY_ALIGNMENT;
        let mut e = vec![0u8; size];
        e[0..4].copy_from_slice(HVLE_SIGNATURE);
        e[0x04..0x08].copy_from_slice(&(size as u32).to_le_bytes());
        e[0x0C..0x10].copy_from_slice(&sequence.to_le_bytes());
        e[0x10..0x14].copy_from_slice(&bins_size.to_le_bytes());
        e[0x14..0x18].copy_from_slice(&(pages.len() as u32).to_le_bytes());
        let mut cursor = ENTRY_HEADER_SIZE + pages.len() * 8;
        for (i, (off, data)) in pages.iter().enumerate() {
            let r = ENTRY_HEADER_SIZE + i * 8;
            e[r..r + 4].copy_from_slice(&off.to_le_bytes());
            e[r + 4..r + 8].copy_from_slice(&(data.len() as u32).to_le_bytes());
            e[cursor..cursor + data.len()].copy_from_slice(data);
            cursor += data.len();
        }
        let hash1 = marvin32(&e[ENTRY_HEADER_SIZE..], LOG_ENTRY_SEED);
        e[0x18..0x20].copy_from_slice(&hash1.to_le_bytes());
        let hash2 = marvin32(&e[..0x20], LOG_ENTRY_SEED);
        e[0x20..0x28].copy_from_slice(&hash2.to_le_bytes());
        e
    }

    pub(crate) fn write_log(dir: &Path, name: &str, entries: &[Vec<u8>]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE)).unwrap();
        for e in entries {
            f.write_all(e).unwrap();
        }
        path
    }

    #[test]
    fn test_parse_log_entries() {
        let mut log = base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE);
        log.extend(log_entry(5, 4096, &[(0, vec![0xCC; 512])]));
        log.extend(log_entry(6, 8192, &[(4096, vec![0xDD; 512])]));
        let entries = parse_log("SYSTEM.LOG1", &log).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 5);
        assert_eq!(entries[1].hive_bins_data_size, 8192);
        assert_eq!(entries[1].pages[0].offset, 4096);
    }

    #[test]
    fn test_hash_mismatch_ends_log() {
        let mut log = base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE);
        log.extend(log_entry(5, 4096, &[(0, vec![0xCC; 512])]));
        let mut bad = log_entry(6, 4096, &[(0, vec![0xDD; 512])]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        log.extend(bad);
        let entries = parse_log("SYSTEM.LOG1", &log).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_legacy_log_unsupported() {
        let mut log = base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE);
        log.extend_from_slice(DIRT_SIGNATURE);
        log.resize(1024, 0);
        assert!(matches!(
            parse_log("SAM.LOG", &log),
            Err(RegfError::UnsupportedLogFormat(_))
        ));
    }

    #[test]
    fn test_invalid_entry_size_is_error() {
        let mut log = base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE);
        let mut entry = log_entry(5, 4096, &[(0, vec![0xCC; 512])]);
        entry[0x04..0x08].copy_from_slice(&100u32.to_le_bytes());
        log.extend(entry);
        assert!(parse_log("SYSTEM.LOG1", &log).is_err());
    }

    #[test]
    fn test_oversized_bins_size_rejected() {
        let mut log = base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE);
        log.extend(log_entry(1, 0x4000_0000, &[]));
        let err = parse_log("SYSTEM.LOG1", &log).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn test_misaligned_bins_size_rejected() {
        let mut log = base_block(1, 1, 4096, LOG_BASE_BLOCK_SIZE);
        log.extend(log_entry(1, 0x1001, &[]));
        let err = parse_log("SYSTEM.LOG1", &log).unwrap_err();
        assert!(err.to_string().contains("not 4096-aligned"));
    }

    #[test]
    fn test_strict_replay_refuses_huge_growth() {
        let dir = tempfile::tempdir().unwrap();
        let mut hive = base_block(2, 1, 4096, BASE_BLOCK_SIZE);
        hive.resize(BASE_BLOCK_SIZE + 4096, 0);
        let log = write_log(dir.path(), "SYSTEM.LOG1", &[log_entry(1, 0x4000_0000, &[])]);
        assert!(replay_logs(&hive, &[log.clone()], true).is_err());
        // lenient mode skips the log and leaves the image as it was
        let out = replay_logs(&hive, &[log], false).unwrap();
        assert_eq!(out.len(), hive.len());
    }

    #[test]
    fn test_replay_applies_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut hive = base_block(7, 5, 4096, BASE_BLOCK_SIZE);
        hive.resize(BASE_BLOCK_SIZE + 4096, 0);

        let log1 = write_log(
            dir.path(),
            "SYSTEM.LOG1",
            &[log_entry(5, 4096, &[(0, vec![0x11; 512])])],
        );
        let log2 = write_log(
            dir.path(),
            "SYSTEM.LOG2",
            &[log_entry(6, 8192, &[(512, vec![0x22; 512]), (4096, vec![0x33; 4096])])],
        );

        let out = replay_logs(&hive, &[log2, log1], true).unwrap();
        assert_eq!(out.len(), BASE_BLOCK_SIZE + 8192);
        assert_eq!(out[BASE_BLOCK_SIZE], 0x11);
        assert_eq!(out[BASE_BLOCK_SIZE + 512], 0x22);
        assert_eq!(out[BASE_BLOCK_SIZE + 4096], 0x33);

        let block = BaseBlock::parse(&out).unwrap();
        assert!(block.is_clean());
        assert!(block.is_checksum_valid());
        assert_eq!(block.primary_sequence, 7);
        assert_eq!(block.hive_bins_data_size, 8192);
    }

    #[test]
    fn test_replay_skips_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut hive = base_block(9, 8, 4096, BASE_BLOCK_SIZE);
        hive.resize(BASE_BLOCK_SIZE + 4096, 0);
        let log = write_log(
            dir.path(),
            "SYSTEM.LOG1",
            &[
                log_entry(3, 4096, &[(0, vec![0xEE; 512])]),
                log_entry(8, 4096, &[(1024, vec![0x44; 512])]),
            ],
        );
        let out = replay_logs(&hive, &[log], true).unwrap();
        assert_eq!(out[BASE_BLOCK_SIZE], 0x00);
        assert_eq!(out[BASE_BLOCK_SIZE + 1024], 0x44);
    }

    #[test]
    fn test_strict_replay_fails_without_applicable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut hive = base_block(9, 8, 4096, BASE_BLOCK_SIZE);
        hive.resize(BASE_BLOCK_SIZE + 4096, 0);
        let log = write_log(dir.path(), "SYSTEM.LOG1", &[]);
        assert!(replay_logs(&hive, &[log.clone()], true).is_err());
        let out = replay_logs(&hive, &[log], false).unwrap();
        assert_eq!(out, hive);
    }

    #[test]
    fn test_strict_replay_fails_on_unreadable_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut hive = base_block(2, 1, 4096, BASE_BLOCK_SIZE);
        hive.resize(BASE_BLOCK_SIZE + 4096, 0);
        let missing = dir.path().join("SYSTEM.LOG2");
        let err = replay_logs(&hive, &[missing], true).unwrap_err();
        assert!(err.to_string().contains("SYSTEM.LOG2"));
    }
}
