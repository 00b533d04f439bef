//! Flat "common format" export of a parsed hive.

use crate::base_block::BASE_BLOCK_SIZE;
use crate::tree::HiveTree;
use crate::util::filetime_to_datetime;
use chrono::SecondsFormat;

/// Kind of a common-format row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonKind {
    Key,
    Value,
}

/// One row of the common-format export.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonRecord {
    pub kind: CommonKind,
    pub active: bool,
    /// Absolute file offset of the record's cell.
    pub offset: u64,
    pub path: Vec<String>,
    /// Value name; empty for keys and for the default value.
    pub name: String,
    /// Declared value type; `None` for keys.
    pub data_type: Option<u32>,
    /// Payload as space-separated lowercase hex bytes; empty for keys.
    pub raw_value: String,
    /// RFC 3339 last write time; keys only.
    pub last_write_time: Option<String>,
}

/// Space-separated lowercase hex, e.g. `01 00 ff`.
pub fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn absolute(cell_offset: u32) -> u64 {
    cell_offset as u64 + BASE_BLOCK_SIZE as u64
}

impl HiveTree {
    /// Each key row followed by its value rows, in walk order.
    pub fn common_records(&self) -> Vec<CommonRecord> {
        let mut out = Vec::with_capacity(self.keys.len() + self.value_count());
        for key in &self.keys {
            let last_write_time = filetime_to_datetime(key.last_written)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true));
            out.push(CommonRecord {
                kind: CommonKind::Key,
                active: key.active,
                offset: absolute(key.cell_offset),
                path: key.path.clone(),
                name: String::new(),
                data_type: None,
                raw_value: String::new(),
                last_write_time,
            });
            for value in &key.values {
                out.push(CommonRecord {
                    kind: CommonKind::Value,
                    active: key.active && value.allocated,
                    offset: absolute(value.cell_offset),
                    path: key.path.clone(),
                    name: value.name.clone(),
                    data_type: Some(value.value_type),
                    raw_value: hex_bytes(&value.data),
                    last_write_time: None,
                });
            }
        }
        out
    }
}
