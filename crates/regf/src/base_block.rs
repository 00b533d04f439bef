//! Hive base block (`HBASE_BLOCK`) parsing and checksum.
//!
//! Layout of the fields read here:
//! ```text
//! +0x000  Signature "regf"
//! +0x004  PrimarySequenceNumber (u32)
//! +0x008  SecondarySequenceNumber (u32)
//! +0x00C  LastWrittenTimestamp (FILETIME)
//! +0x014  MajorVersion (u32)
//! +0x018  MinorVersion (u32)
//! +0x01C  FileType (u32)
//! +0x020  FileFormat (u32)
//! +0x024  RootCellOffset (u32)
//! +0x028  HiveBinsDataSize (u32)
//! +0x02C  ClusteringFactor (u32)
//! +0x030  FileName (64 bytes, UTF-16LE)
//! +0x1FC  Checksum (XOR-32 of the 508 bytes before it)
//! +0xFF8  BootType (u32)
//! +0xFFC  BootRecover (u32)
//! ```

use crate::error::{RegfError, RegfResult};
use crate::util::{filetime_to_datetime, le_u32, le_u64, read_utf16le_string, slice};
use std::fmt;

pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

/// The signature read as a little-endian u32.
pub const REGF_MAGIC: u32 = 0x6667_6572;

/// HBASE_BLOCK is always 4096 bytes; hive bins start right after it.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Number of bytes covered by the checksum.
const CHECKSUM_SPAN: usize = 0x1FC;

const OFF_PRIMARY_SEQ: usize = 0x04;
const OFF_SECONDARY_SEQ: usize = 0x08;
const OFF_TIMESTAMP: usize = 0x0C;
const OFF_MAJOR: usize = 0x14;
const OFF_MINOR: usize = 0x18;
const OFF_FILE_TYPE: usize = 0x1C;
const OFF_FILE_FORMAT: usize = 0x20;
const OFF_ROOT_CELL: usize = 0x24;
const OFF_HIVE_BINS_SIZE: usize = 0x28;
const OFF_CLUSTERING: usize = 0x2C;
const OFF_FILE_NAME: usize = 0x30;
const FILE_NAME_LEN: usize = 64;
const OFF_CHECKSUM: usize = CHECKSUM_SPAN;
const OFF_BOOT_TYPE: usize = 0xFF8;
const OFF_BOOT_RECOVER: usize = 0xFFC;

/// Parsed hive header.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    pub signature: u32,
    pub primary_sequence: u32,
    pub secondary_sequence: u32,
    pub last_written: u64,
    pub major_version: u32,
    pub minor_version: u32,
    pub file_type: u32,
    pub file_format: u32,
    pub root_cell_offset: u32,
    pub hive_bins_data_size: u32,
    pub clustering_factor: u32,
    pub file_name: String,
    pub checksum: u32,
    /// Zero when the block was truncated before the boot fields (log base blocks are 512 bytes).
    pub boot_type: u32,
    pub boot_recover: u32,
    /// Checksum recomputed over the bytes this block was parsed from.
    pub calculated_checksum: u32,
}

impl BaseBlock {
    /// Parse a base block from the start of `data`.
    ///
    /// Only the first 512 bytes are required; the boot fields are read when
    /// the full 4096-byte block is present.
    pub fn parse(data: &[u8]) -> RegfResult<Self> {
        let sig = slice(data, 0, 4)?;
        if sig != REGF_SIGNATURE {
            return Err(RegfError::BadSignature {
                offset: 0,
                expected: "regf",
                found: [sig[0], sig[1], sig[2], sig[3]],
            });
        }

        let name_bytes = slice(data, OFF_FILE_NAME, FILE_NAME_LEN)?;
        let (boot_type, boot_recover) = if data.len() >= BASE_BLOCK_SIZE {
            (le_u32(data, OFF_BOOT_TYPE)?, le_u32(data, OFF_BOOT_RECOVER)?)
        } else {
            (0, 0)
        };

        Ok(BaseBlock {
            signature: le_u32(data, 0)?,
            primary_sequence: le_u32(data, OFF_PRIMARY_SEQ)?,
            secondary_sequence: le_u32(data, OFF_SECONDARY_SEQ)?,
            last_written: le_u64(data, OFF_TIMESTAMP)?,
            major_version: le_u32(data, OFF_MAJOR)?,
            minor_version: le_u32(data, OFF_MINOR)?,
            file_type: le_u32(data, OFF_FILE_TYPE)?,
            file_format: le_u32(data, OFF_FILE_FORMAT)?,
            root_cell_offset: le_u32(data, OFF_ROOT_CELL)?,
            hive_bins_data_size: le_u32(data, OFF_HIVE_BINS_SIZE)?,
            clustering_factor: le_u32(data, OFF_CLUSTERING)?,
            file_name: read_utf16le_string(name_bytes),
            checksum: le_u32(data, OFF_CHECKSUM)?,
            boot_type,
            boot_recover,
            calculated_checksum: compute_checksum(data)?,
        })
    }

    pub fn is_checksum_valid(&self) -> bool {
        self.checksum == self.calculated_checksum
    }

    /// Primary and secondary sequence numbers agree.
    pub fn is_clean(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }
}

/// XOR-32 over the first 508 bytes, with 0xFFFFFFFF and 0 remapped.
pub fn compute_checksum(data: &[u8]) -> RegfResult<u32> {
    let span = slice(data, 0, CHECKSUM_SPAN)?;
    let sum = span
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .fold(0u32, |acc, v| acc ^ v);
    Ok(match sum {
        0xFFFF_FFFF => 0xFFFF_FFFE,
        0 => 1,
        other => other,
    })
}

/// Recompute and store the checksum of a base block in place.
pub fn rewrite_checksum(data: &mut [u8]) -> RegfResult<()> {
    let sum = compute_checksum(data)?;
    crate::util::put_u32(data, OFF_CHECKSUM, sum);
    Ok(())
}

pub(crate) fn set_sequence_numbers(data: &mut [u8], primary: u32, secondary: u32) {
    crate::util::put_u32(data, OFF_PRIMARY_SEQ, primary);
    crate::util::put_u32(data, OFF_SECONDARY_SEQ, secondary);
}

pub(crate) fn set_hive_bins_data_size(data: &mut [u8], size: u32) {
    crate::util::put_u32(data, OFF_HIVE_BINS_SIZE, size);
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let written = filetime_to_datetime(self.last_written)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("{:#x}", self.last_written));
        writeln!(f, "Signature: regf")?;
        writeln!(f, "Primary sequence number: {}", self.primary_sequence)?;
        writeln!(f, "Secondary sequence number: {}", self.secondary_sequence)?;
        writeln!(f, "Last written: {}", written)?;
        writeln!(f, "Version: {}.{}", self.major_version, self.minor_version)?;
        writeln!(f, "File type: {}", self.file_type)?;
        writeln!(f, "File format: {}", self.file_format)?;
        writeln!(f, "Root cell offset: {:#x}", self.root_cell_offset)?;
        writeln!(f, "Hive bins data size: {:#x}", self.hive_bins_data_size)?;
        writeln!(f, "Clustering factor: {}", self.clustering_factor)?;
        writeln!(f, "File name: {}", self.file_name)?;
        writeln!(
            f,
            "Checksum: {:#010x} (calculated {:#010x}, {})",
            self.checksum,
            self.calculated_checksum,
            if self.is_checksum_valid() { "valid" } else { "INVALID" }
        )?;
        writeln!(f, "Boot type: {}", self.boot_type)?;
        write!(f, "Boot recover: {}", self.boot_recover)
    }
}
