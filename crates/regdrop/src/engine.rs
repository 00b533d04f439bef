//! The hive engine boundary.
//!
//! The pipeline never touches hive internals: it asks a [`HiveEngine`] for
//! the header, checksum verdict, log replay, parse and common-format export.
//! [`RegfEngine`] is the production implementation backed by the `regf` crate.

use crate::error::{RegdropError, RegdropResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Hive header as seen by the integrity gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveHeader {
    /// First four bytes as a little-endian u32.
    pub signature: u32,
    /// Checksum stored in the header.
    pub checksum: u32,
    pub primary_sequence: u32,
    pub secondary_sequence: u32,
    /// Engine-rendered description written to `info.txt`.
    pub description: String,
    /// Raw header bytes the checksum covers.
    pub raw: Vec<u8>,
}

impl HiveHeader {
    /// Primary and secondary sequence numbers agree.
    pub fn is_clean(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }
}

impl fmt::Display for HiveHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Row kind in the common-format stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Key,
    Value,
}

/// One row of the engine's common-format export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: RecordKind,
    /// False for soft-deleted / recovered records.
    pub active: bool,
    /// Hive-relative byte offset.
    pub offset: u64,
    /// Key-name segments from the root.
    pub path: Vec<String>,
    /// Value name; empty for the default value and for keys.
    pub name: String,
    /// Windows registry value type; `None` for keys.
    pub data_type: Option<u32>,
    /// Space-separated hex bytes, or empty.
    pub raw_value: String,
    /// Keys only.
    pub last_write_time: Option<String>,
}

/// Capability the pipeline needs from a hive parser.
pub trait HiveEngine: Send + Sync {
    /// Opaque parsed hive.
    type Tree;

    fn read_header(&self, bytes: &[u8]) -> RegdropResult<HiveHeader>;

    fn validate_checksum(&self, header: &HiveHeader) -> bool;

    /// Return recovered hive bytes. With `strict`, any log that cannot be
    /// applied cleanly is an error.
    fn replay_logs(&self, bytes: &[u8], logs: &[PathBuf], strict: bool) -> RegdropResult<Vec<u8>>;

    fn parse(&self, bytes: &[u8], recover_deleted: bool) -> RegdropResult<Self::Tree>;

    /// Flat record stream, stable within one call.
    fn export_common_format(&self, tree: &Self::Tree) -> Vec<RawRecord>;
}

/// [`HiveEngine`] backed by the `regf` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegfEngine;

impl HiveEngine for RegfEngine {
    type Tree = regf::HiveTree;

    fn read_header(&self, bytes: &[u8]) -> RegdropResult<HiveHeader> {
        let block =
            regf::BaseBlock::parse(bytes).map_err(|e| RegdropError::Engine(e.to_string()))?;
        let raw_len = std::cmp::min(bytes.len(), regf::BASE_BLOCK_SIZE);
        Ok(HiveHeader {
            signature: block.signature,
            checksum: block.checksum,
            primary_sequence: block.primary_sequence,
            secondary_sequence: block.secondary_sequence,
            description: block.to_string(),
            raw: bytes[..raw_len].to_vec(),
        })
    }

    fn validate_checksum(&self, header: &HiveHeader) -> bool {
        match regf::compute_checksum(&header.raw) {
            Ok(calculated) => calculated == header.checksum,
            Err(_) => false,
        }
    }

    fn replay_logs(&self, bytes: &[u8], logs: &[PathBuf], strict: bool) -> RegdropResult<Vec<u8>> {
        regf::replay_logs(bytes, logs, strict).map_err(|e| RegdropError::Replay(e.to_string()))
    }

    fn parse(&self, bytes: &[u8], recover_deleted: bool) -> RegdropResult<Self::Tree> {
        regf::HiveTree::parse(bytes, recover_deleted).map_err(|e| RegdropError::Engine(e.to_string()))
    }

    fn export_common_format(&self, tree: &Self::Tree) -> Vec<RawRecord> {
        tree.common_records()
            .into_iter()
            .map(|r| RawRecord {
                kind: match r.kind {
                    regf::CommonKind::Key => RecordKind::Key,
                    regf::CommonKind::Value => RecordKind::Value,
                },
                active: r.active,
                offset: r.offset,
                path: r.path,
                name: r.name,
                data_type: r.data_type,
                raw_value: r.raw_value,
                last_write_time: r.last_write_time,
            })
            .collect()
    }
}
