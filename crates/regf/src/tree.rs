//! Whole-hive walk: every reachable key with its path and values, plus
//! optionally keys recovered from unallocated cells.

use crate::base_block::{BaseBlock, BASE_BLOCK_SIZE};
use crate::error::RegfResult;
use crate::reader::{HiveReader, KeyNode, KeyValue, NK_SIGNATURE};
use crate::util::{le_i32, le_u16, le_u32};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const HBIN_SIGNATURE: &[u8; 4] = b"hbin";
const HBIN_HEADER_SIZE: usize = 0x20;
const HBIN_ALIGNMENT: usize = 4096;

/// A key in the parsed tree.
#[derive(Debug, Clone)]
pub struct TreeKey {
    /// Cell offset relative to the hive bins data.
    pub cell_offset: u32,
    /// False for keys recovered from free cells.
    pub active: bool,
    /// Key names from the root down to this key, inclusive.
    pub path: Vec<String>,
    /// Last write time, raw FILETIME.
    pub last_written: u64,
    pub values: Vec<KeyValue>,
}

/// A parsed hive: its base block and flattened key list in depth-first order.
#[derive(Debug, Clone)]
pub struct HiveTree {
    pub base: BaseBlock,
    pub keys: Vec<TreeKey>,
}

impl HiveTree {
    /// Parse a full hive image.
    pub fn parse(image: &[u8], recover_deleted: bool) -> RegfResult<Self> {
        let base = BaseBlock::parse(image)?;
        let bins_end = std::cmp::min(
            image.len(),
            BASE_BLOCK_SIZE.saturating_add(base.hive_bins_data_size as usize),
        );
        let bins = image.get(BASE_BLOCK_SIZE..bins_end).unwrap_or(&[]);
        let reader = HiveReader::new(bins, base.minor_version);

        let mut keys = walk(&reader, base.root_cell_offset)?;
        debug!("regf: walked {} live keys", keys.len());

        if recover_deleted {
            let recovered = recover_free_keys(&reader, &keys);
            debug!("regf: recovered {} deleted keys", recovered.len());
            keys.extend(recovered);
        }

        Ok(HiveTree { base, keys })
    }

    pub fn value_count(&self) -> usize {
        self.keys.iter().map(|k| k.values.len()).sum()
    }
}

fn key_values(reader: &HiveReader<'_>, key: &KeyNode) -> Vec<KeyValue> {
    reader.values(key).unwrap_or_else(|e| {
        warn!("regf: values of key at {:#x} unreadable: {}", key.cell_offset, e);
        Vec::new()
    })
}

fn walk(reader: &HiveReader<'_>, root_offset: u32) -> RegfResult<Vec<TreeKey>> {
    let root = reader.read_key_node(root_offset)?;
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![(root, Vec::<String>::new())];

    while let Some((key, parent_path)) = stack.pop() {
        if !visited.insert(key.cell_offset) {
            debug!("regf: key at {:#x} already visited, skipping", key.cell_offset);
            continue;
        }
        let mut path = parent_path;
        path.push(key.name.clone());

        let subkeys = reader.subkeys(&key).unwrap_or_else(|e| {
            warn!("regf: subkeys of '{}' unreadable: {}", path.join("\\"), e);
            Vec::new()
        });
        for child in subkeys.into_iter().rev() {
            stack.push((child, path.clone()));
        }

        out.push(TreeKey {
            cell_offset: key.cell_offset,
            active: true,
            values: key_values(reader, &key),
            last_written: key.last_written,
            path,
        });
    }
    Ok(out)
}

/// Scan hive bins for unallocated cells that still hold a key node.
fn recover_free_keys(reader: &HiveReader<'_>, live: &[TreeKey]) -> Vec<TreeKey> {
    let by_offset: HashMap<u32, &[String]> = live
        .iter()
        .map(|k| (k.cell_offset, k.path.as_slice()))
        .collect();
    let bins = reader.bins();
    let mut out = Vec::new();

    let mut bin_off = 0usize;
    while bin_off + HBIN_HEADER_SIZE <= bins.len() {
        if &bins[bin_off..bin_off + 4] != HBIN_SIGNATURE {
            debug!("regf: no hbin signature at {:#x}, stopping scan", bin_off);
            break;
        }
        let bin_size = match le_u32(bins, bin_off + 8) {
            Ok(s) if s as usize >= HBIN_HEADER_SIZE && s as usize % HBIN_ALIGNMENT == 0 => s as usize,
            _ => break,
        };
        let bin_end = std::cmp::min(bin_off + bin_size, bins.len());

        let mut cell_off = bin_off + HBIN_HEADER_SIZE;
        while cell_off + 4 <= bin_end {
            let raw = match le_i32(bins, cell_off) {
                Ok(r) => r,
                Err(_) => break,
            };
            let size = raw.unsigned_abs() as usize;
            if size < 8 || size % 8 != 0 {
                debug!("regf: misaligned cell at {:#x}, skipping rest of bin", cell_off);
                break;
            }
            if raw > 0 && le_u16(bins, cell_off + 4).ok() == Some(NK_SIGNATURE) {
                if let Some(key) = recover_key(reader, cell_off as u32, &by_offset) {
                    out.push(key);
                }
            }
            cell_off += size;
        }
        bin_off += bin_size;
    }
    out
}

fn recover_key(
    reader: &HiveReader<'_>,
    cell_offset: u32,
    live: &HashMap<u32, &[String]>,
) -> Option<TreeKey> {
    let cell = reader.cell(cell_offset).ok()?;
    let key = match reader.key_node_from_cell(cell, cell_offset) {
        Ok(k) => k,
        Err(e) => {
            debug!("regf: free nk at {:#x} unparseable: {}", cell_offset, e);
            return None;
        }
    };
    let mut path = live
        .get(&key.parent_offset)
        .map(|p| p.to_vec())
        .unwrap_or_default();
    path.push(key.name.clone());

    Some(TreeKey {
        cell_offset,
        active: false,
        values: reader.values(&key).unwrap_or_default(),
        last_written: key.last_written,
        path,
    })
}
