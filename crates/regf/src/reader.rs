//! Cell-level reader for the hive bins area.
//!
//! Every offset taken by [`HiveReader`] is relative to the start of the hive
//! bins data (file offset 0x1000). Cell format:
//! ```text
//! +0x0  Size (i32): negative when allocated, positive when free
//! +0x4  Cell data, starting with a 2-byte record signature:
//!         "nk" key node, "vk" key value, "lf"/"lh"/"li"/"ri" subkey lists,
//!         "db" big data, "sk" security
//! ```

use crate::error::{RegfError, RegfResult};
use crate::util::{le_i32, le_u16, le_u32, le_u64, read_utf16le_string, slice};
use tracing::debug;

pub(crate) const NK_SIGNATURE: u16 = 0x6B6E; // "nk" little-endian
pub(crate) const VK_SIGNATURE: u16 = 0x6B76; // "vk" little-endian
const LF_SIGNATURE: u16 = 0x666C; // "lf" little-endian
const LH_SIGNATURE: u16 = 0x686C; // "lh" little-endian
const RI_SIGNATURE: u16 = 0x6972; // "ri" little-endian
const LI_SIGNATURE: u16 = 0x696C; // "li" little-endian
const DB_SIGNATURE: u16 = 0x6264; // "db" little-endian

/// Offset value meaning "no cell".
pub(crate) const NO_CELL: u32 = 0xFFFF_FFFF;

// NK offsets, relative to the signature
const NK_FLAGS: usize = 2;
const NK_TIMESTAMP: usize = 4;
const NK_PARENT: usize = 16;
const NK_SUBKEY_COUNT: usize = 20;
const NK_SUBKEY_LIST: usize = 28;
const NK_VALUE_COUNT: usize = 36;
const NK_VALUE_LIST: usize = 40;
const NK_CLASS_NAME_OFFSET: usize = 48;
const NK_NAME_LENGTH: usize = 72;
const NK_CLASS_NAME_LENGTH: usize = 74;
const NK_NAME_START: usize = 76;

/// NK flag: KEY_HIVE_ENTRY (root key of the hive).
pub const KEY_HIVE_ENTRY: u16 = 0x0004;
/// NK flag: KEY_COMP_NAME (name is ASCII, not UTF-16).
pub const KEY_COMP_NAME: u16 = 0x0020;

// VK offsets, relative to the signature
const VK_NAME_LENGTH: usize = 2;
const VK_DATA_LENGTH: usize = 4;
const VK_DATA_OFFSET: usize = 8;
const VK_TYPE: usize = 12;
const VK_FLAGS: usize = 16;
const VK_NAME_START: usize = 20;

/// VK flag: value name is ASCII (compressed).
const VALUE_COMP_NAME: u16 = 0x0001;

/// Bit 31 of the VK data length: data lives in the offset field itself.
const DATA_RESIDENT: u32 = 0x8000_0000;

/// Largest payload a single data cell holds before big-data segmentation.
const BIG_DATA_SEGMENT: usize = 16_344;

/// Sanity cap on list lengths.
const MAX_LIST_ENTRIES: usize = 65_535;

/// A parsed registry key node.
#[derive(Debug, Clone)]
pub struct KeyNode {
    /// Cell offset (relative to hive bins data).
    pub cell_offset: u32,
    /// Cell is allocated (false for recovered free cells).
    pub allocated: bool,
    pub name: String,
    pub flags: u16,
    /// Last write time, raw FILETIME.
    pub last_written: u64,
    pub parent_offset: u32,
    pub subkey_count: u32,
    pub subkey_list_offset: u32,
    pub value_count: u32,
    pub value_list_offset: u32,
    pub class_name: Option<String>,
}

/// A parsed registry value.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub cell_offset: u32,
    pub allocated: bool,
    /// Value name (empty string = "(Default)" value).
    pub name: String,
    /// Value type (REG_SZ=1, REG_BINARY=3, REG_DWORD=4, etc.).
    pub value_type: u32,
    /// Raw value data bytes.
    pub data: Vec<u8>,
}

/// Registry value types.
pub mod reg_types {
    pub const REG_NONE: u32 = 0;
    pub const REG_SZ: u32 = 1;
    pub const REG_EXPAND_SZ: u32 = 2;
    pub const REG_BINARY: u32 = 3;
    pub const REG_DWORD: u32 = 4;
    pub const REG_DWORD_BIG_ENDIAN: u32 = 5;
    pub const REG_LINK: u32 = 6;
    pub const REG_MULTI_SZ: u32 = 7;
    pub const REG_QWORD: u32 = 11;
}

/// A cell as found in the hive bins area.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cell<'a> {
    pub allocated: bool,
    /// Cell data, without the 4-byte size prefix.
    pub data: &'a [u8],
}

/// Reader over the hive bins area of a hive image.
pub struct HiveReader<'a> {
    bins: &'a [u8],
    minor_version: u32,
}

impl<'a> HiveReader<'a> {
    /// `bins` is the hive bins data (everything after the base block).
    pub fn new(bins: &'a [u8], minor_version: u32) -> Self {
        HiveReader {
            bins,
            minor_version,
        }
    }

    pub fn bins(&self) -> &'a [u8] {
        self.bins
    }

    /// Read the cell at `cell_offset`, clamped to the hive bins area.
    pub(crate) fn cell(&self, cell_offset: u32) -> RegfResult<Cell<'a>> {
        let off = cell_offset as usize;
        if cell_offset == NO_CELL || off + 4 > self.bins.len() {
            return Err(RegfError::CellOutOfRange(cell_offset));
        }
        let raw_size = le_i32(self.bins, off)?;
        let size = raw_size.unsigned_abs() as usize;
        if size < 4 {
            return Err(RegfError::invalid_cell(cell_offset, format!("cell size {}", raw_size)));
        }
        let end = std::cmp::min(off + size, self.bins.len());
        Ok(Cell {
            allocated: raw_size < 0,
            data: &self.bins[off + 4..end],
        })
    }

    fn signature(cell: &Cell<'_>, cell_offset: u32) -> RegfResult<u16> {
        le_u16(cell.data, 0).map_err(|_| RegfError::invalid_cell(cell_offset, "cell too small"))
    }

    /// Read a key node (NK record) at the given cell offset.
    pub fn read_key_node(&self, cell_offset: u32) -> RegfResult<KeyNode> {
        let cell = self.cell(cell_offset)?;
        let sig = Self::signature(&cell, cell_offset)?;
        if sig != NK_SIGNATURE {
            return Err(RegfError::invalid_cell(
                cell_offset,
                format!("expected NK signature, got {:#06x}", sig),
            ));
        }
        Self::parse_key_node(self, cell, cell_offset)
    }

    fn parse_key_node(&self, cell: Cell<'a>, cell_offset: u32) -> RegfResult<KeyNode> {
        let nk = cell.data;
        let flags = le_u16(nk, NK_FLAGS)?;
        let name_length = le_u16(nk, NK_NAME_LENGTH)? as usize;
        let name_bytes = slice(nk, NK_NAME_START, name_length)?;
        let name = if flags & KEY_COMP_NAME != 0 {
            String::from_utf8_lossy(name_bytes).into_owned()
        } else {
            read_utf16le_string(name_bytes)
        };

        let class_name_offset = le_u32(nk, NK_CLASS_NAME_OFFSET)?;
        let class_name_length = le_u16(nk, NK_CLASS_NAME_LENGTH)?;
        let class_name = if class_name_length > 0 && class_name_offset != NO_CELL {
            self.read_class_name(class_name_offset, class_name_length).ok()
        } else {
            None
        };

        Ok(KeyNode {
            cell_offset,
            allocated: cell.allocated,
            name,
            flags,
            last_written: le_u64(nk, NK_TIMESTAMP)?,
            parent_offset: le_u32(nk, NK_PARENT)?,
            subkey_count: le_u32(nk, NK_SUBKEY_COUNT)?,
            subkey_list_offset: le_u32(nk, NK_SUBKEY_LIST)?,
            value_count: le_u32(nk, NK_VALUE_COUNT)?,
            value_list_offset: le_u32(nk, NK_VALUE_LIST)?,
            class_name,
        })
    }

    /// Parse a key node from a free cell found by a scan.
    pub(crate) fn key_node_from_cell(&self, cell: Cell<'a>, cell_offset: u32) -> RegfResult<KeyNode> {
        self.parse_key_node(cell, cell_offset)
    }

    fn read_class_name(&self, cell_offset: u32, length: u16) -> RegfResult<String> {
        let cell = self.cell(cell_offset)?;
        Ok(read_utf16le_string(slice(cell.data, 0, length as usize)?))
    }

    /// Enumerate subkeys of a key node.
    pub fn subkeys(&self, key: &KeyNode) -> RegfResult<Vec<KeyNode>> {
        if key.subkey_count == 0 || key.subkey_list_offset == NO_CELL {
            return Ok(Vec::new());
        }

        let offsets = self.read_subkey_list(key.subkey_list_offset, 0)?;
        let mut subkeys = Vec::with_capacity(offsets.len());
        for off in offsets {
            match self.read_key_node(off) {
                Ok(k) => subkeys.push(k),
                Err(e) => debug!("regf: skipping bad subkey at {:#x}: {}", off, e),
            }
        }
        Ok(subkeys)
    }

    /// Read a subkey list (lf/lh/ri/li record) and return child cell offsets.
    fn read_subkey_list(&self, cell_offset: u32, depth: u32) -> RegfResult<Vec<u32>> {
        if depth > 8 {
            return Err(RegfError::invalid_cell(cell_offset, "subkey index nested too deeply"));
        }
        let cell = self.cell(cell_offset)?;
        let sig = Self::signature(&cell, cell_offset)?;
        let count = le_u16(cell.data, 2)? as usize;

        let entry_size = match sig {
            LF_SIGNATURE | LH_SIGNATURE => 8, // cell offset + name hash
            LI_SIGNATURE | RI_SIGNATURE => 4,
            _ => {
                return Err(RegfError::invalid_cell(
                    cell_offset,
                    format!("unknown subkey list signature {:#06x}", sig),
                ))
            }
        };

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let off = le_u32(cell.data, 4 + i * entry_size)?;
            if sig == RI_SIGNATURE {
                match self.read_subkey_list(off, depth + 1) {
                    Ok(sub) => offsets.extend(sub),
                    Err(e) => debug!("regf: skipping bad ri sub-list at {:#x}: {}", off, e),
                }
            } else {
                offsets.push(off);
            }
        }
        Ok(offsets)
    }

    /// Enumerate values of a key node.
    pub fn values(&self, key: &KeyNode) -> RegfResult<Vec<KeyValue>> {
        if key.value_count == 0 || key.value_list_offset == NO_CELL {
            return Ok(Vec::new());
        }
        let count = key.value_count as usize;
        if count > MAX_LIST_ENTRIES {
            return Err(RegfError::invalid_cell(
                key.value_list_offset,
                format!("value count {} is unreasonably large", count),
            ));
        }

        let list = self.cell(key.value_list_offset)?;
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let vk_offset = le_u32(list.data, i * 4)?;
            match self.read_value(vk_offset) {
                Ok(v) => values.push(v),
                Err(e) => debug!("regf: skipping bad value at {:#x}: {}", vk_offset, e),
            }
        }
        Ok(values)
    }

    /// Read a single value (VK record).
    pub fn read_value(&self, cell_offset: u32) -> RegfResult<KeyValue> {
        let cell = self.cell(cell_offset)?;
        let sig = Self::signature(&cell, cell_offset)?;
        if sig != VK_SIGNATURE {
            return Err(RegfError::invalid_cell(
                cell_offset,
                format!("expected VK signature, got {:#06x}", sig),
            ));
        }
        let vk = cell.data;

        let name_length = le_u16(vk, VK_NAME_LENGTH)? as usize;
        let data_length_raw = le_u32(vk, VK_DATA_LENGTH)?;
        let data_offset = le_u32(vk, VK_DATA_OFFSET)?;
        let value_type = le_u32(vk, VK_TYPE)?;
        let vk_flags = le_u16(vk, VK_FLAGS)?;

        let name_bytes = slice(vk, VK_NAME_START, name_length)?;
        let name = if vk_flags & VALUE_COMP_NAME != 0 {
            String::from_utf8_lossy(name_bytes).into_owned()
        } else {
            read_utf16le_string(name_bytes)
        };

        let data_length = (data_length_raw & !DATA_RESIDENT) as usize;
        let data = if data_length == 0 {
            Vec::new()
        } else if data_length_raw & DATA_RESIDENT != 0 {
            let inline_len = std::cmp::min(data_length, 4);
            data_offset.to_le_bytes()[..inline_len].to_vec()
        } else {
            self.read_value_data(data_offset, data_length)?
        };

        Ok(KeyValue {
            cell_offset,
            allocated: cell.allocated,
            name,
            value_type,
            data,
        })
    }

    fn read_value_data(&self, cell_offset: u32, length: usize) -> RegfResult<Vec<u8>> {
        let cell = self.cell(cell_offset)?;
        if length > BIG_DATA_SEGMENT && self.minor_version > 3 {
            if let Ok(DB_SIGNATURE) = le_u16(cell.data, 0) {
                return self.read_big_data(cell_offset, cell, length);
            }
        }
        let actual = std::cmp::min(length, cell.data.len());
        Ok(cell.data[..actual].to_vec())
    }

    /// Reassemble a value stored as a "db" record of segments.
    fn read_big_data(&self, cell_offset: u32, cell: Cell<'a>, length: usize) -> RegfResult<Vec<u8>> {
        let segments = le_u16(cell.data, 2)? as usize;
        let list_offset = le_u32(cell.data, 4)?;
        let list = self.cell(list_offset)?;

        let mut data = Vec::with_capacity(length);
        for i in 0..segments {
            let seg_offset = le_u32(list.data, i * 4)?;
            let seg = self.cell(seg_offset)?;
            let take = std::cmp::min(BIG_DATA_SEGMENT, length - data.len()).min(seg.data.len());
            data.extend_from_slice(&seg.data[..take]);
            if data.len() >= length {
                break;
            }
        }
        if data.len() < length {
            debug!(
                "regf: big data at {:#x} short by {} bytes",
                cell_offset,
                length - data.len()
            );
        }
        Ok(data)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a hive bins area cell by cell. Offsets returned are relative to the bins start.
    pub(crate) struct BinsBuilder {
        pub bins: Vec<u8>,
        next: usize,
    }

    impl BinsBuilder {
        pub fn new() -> Self {
            let mut bins = vec![0u8; 4096];
            bins[0..4].copy_from_slice(b"hbin");
            bins[8..12].copy_from_slice(&4096u32.to_le_bytes());
            BinsBuilder { bins, next: 0x20 }
        }

        /// Append a cell holding `payload`; returns its offset.
        pub fn cell(&mut self, payload: &[u8], allocated: bool) -> u32 {
            let size = (4 + payload.len() + 7) & !7;
            let off = self.next;
            if off + size > self.bins.len() {
                let grow = (off + size - self.bins.len() + 4095) & !4095;
                self.bins.resize(self.bins.len() + grow, 0);
            }
            let raw = if allocated { -(size as i32) } else { size as i32 };
            self.bins[off..off + 4].copy_from_slice(&raw.to_le_bytes());
            self.bins[off + 4..off + 4 + payload.len()].copy_from_slice(payload);
            self.next += size;
            off as u32
        }

        /// Close the trailing free space with one free cell so scans stay aligned.
        pub fn finish(mut self) -> Vec<u8> {
            let len = self.bins.len();
            // keep the bin header size in sync with the grown buffer
            self.bins[8..12].copy_from_slice(&(len as u32).to_le_bytes());
            let rest = len - self.next;
            if rest >= 8 {
                self.bins[self.next..self.next + 4].copy_from_slice(&(rest as i32).to_le_bytes());
            }
            self.bins
        }
    }

    pub(crate) fn nk_payload(
        name: &str,
        flags: u16,
        parent: u32,
        subkeys: (u32, u32),
        values: (u32, u32),
        timestamp: u64,
    ) -> Vec<u8> {
        let mut nk = vec![0u8; NK_NAME_START + name.len()];
        nk[0..2].copy_from_slice(&NK_SIGNATURE.to_le_bytes());
        nk[NK_FLAGS..NK_FLAGS + 2].copy_from_slice(&(flags | KEY_COMP_NAME).to_le_bytes());
        nk[NK_TIMESTAMP..NK_TIMESTAMP + 8].copy_from_slice(&timestamp.to_le_bytes());
        nk[NK_PARENT..NK_PARENT + 4].copy_from_slice(&parent.to_le_bytes());
        nk[NK_SUBKEY_COUNT..NK_SUBKEY_COUNT + 4].copy_from_slice(&subkeys.0.to_le_bytes());
        nk[NK_SUBKEY_LIST..NK_SUBKEY_LIST + 4].copy_from_slice(&subkeys.1.to_le_bytes());
        nk[NK_VALUE_COUNT..NK_VALUE_COUNT + 4].copy_from_slice(&values.0.to_le_bytes());
        nk[NK_VALUE_LIST..NK_VALUE_LIST + 4].copy_from_slice(&values.1.to_le_bytes());
        nk[NK_CLASS_NAME_OFFSET..NK_CLASS_NAME_OFFSET + 4].copy_from_slice(&NO_CELL.to_le_bytes());
        nk[NK_NAME_LENGTH..NK_NAME_LENGTH + 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
        nk[NK_NAME_START..].copy_from_slice(name.as_bytes());
        nk
    }

    /// VK record; `data` of four bytes or fewer is stored resident.
    pub(crate) fn vk_payload(name: &str, value_type: u32, data_len: u32, data_offset: u32) -> Vec<u8> {
        let mut vk = vec![0u8; VK_NAME_START + name.len()];
        vk[0..2].copy_from_slice(&VK_SIGNATURE.to_le_bytes());
        vk[VK_NAME_LENGTH..VK_NAME_LENGTH + 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
        vk[VK_DATA_LENGTH..VK_DATA_LENGTH + 4].copy_from_slice(&data_len.to_le_bytes());
        vk[VK_DATA_OFFSET..VK_DATA_OFFSET + 4].copy_from_slice(&data_offset.to_le_bytes());
        vk[VK_TYPE..VK_TYPE + 4].copy_from_slice(&value_type.to_le_bytes());
        vk[VK_FLAGS..VK_FLAGS + 2].copy_from_slice(&VALUE_COMP_NAME.to_le_bytes());
        vk[VK_NAME_START..].copy_from_slice(name.as_bytes());
        vk
    }

    pub(crate) fn offsets_payload(offsets: &[u32]) -> Vec<u8> {
        offsets.iter().flat_map(|o| o.to_le_bytes()).collect()
    }

    pub(crate) fn lf_payload(offsets: &[u32]) -> Vec<u8> {
        let mut lf = Vec::new();
        lf.extend_from_slice(&LF_SIGNATURE.to_le_bytes());
        lf.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
        for off in offsets {
            lf.extend_from_slice(&off.to_le_bytes());
            lf.extend_from_slice(&0u32.to_le_bytes());
        }
        lf
    }

    #[test]
    fn test_read_root_key() {
        let mut b = BinsBuilder::new();
        let root = b.cell(
            &nk_payload("ROOT", KEY_HIVE_ENTRY, NO_CELL, (0, NO_CELL), (0, NO_CELL), 42),
            true,
        );
        let bins = b.finish();
        let reader = HiveReader::new(&bins, 5);
        let key = reader.read_key_node(root).unwrap();
        assert_eq!(key.name, "ROOT");
        assert!(key.allocated);
        assert!(key.flags & KEY_HIVE_ENTRY != 0);
        assert_eq!(key.last_written, 42);
        assert!(reader.subkeys(&key).unwrap().is_empty());
        assert!(reader.values(&key).unwrap().is_empty());
    }

    #[test]
    fn test_subkeys_and_values() {
        let mut b = BinsBuilder::new();
        let child = b.cell(&nk_payload("Child", 0, 0x20, (0, NO_CELL), (0, NO_CELL), 0), true);
        let data = b.cell(b"h\0i\0\0\0", true);
        let vk_sz = b.cell(&vk_payload("Greeting", reg_types::REG_SZ, 6, data), true);
        let vk_dw = b.cell(
            &vk_payload("Count", reg_types::REG_DWORD, 4 | DATA_RESIDENT, 0x0000_0007),
            true,
        );
        let vlist = b.cell(&offsets_payload(&[vk_sz, vk_dw]), true);
        let slist = b.cell(&lf_payload(&[child]), true);
        let root = b.cell(
            &nk_payload("ROOT", KEY_HIVE_ENTRY, NO_CELL, (1, slist), (2, vlist), 0),
            true,
        );
        let bins = b.finish();
        let reader = HiveReader::new(&bins, 5);
        let key = reader.read_key_node(root).unwrap();

        let subkeys = reader.subkeys(&key).unwrap();
        assert_eq!(subkeys.len(), 1);
        assert_eq!(subkeys[0].name, "Child");

        let values = reader.values(&key).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].name, "Greeting");
        assert_eq!(values[0].data, b"h\0i\0\0\0");
        assert_eq!(values[1].value_type, reg_types::REG_DWORD);
        assert_eq!(values[1].data, vec![7, 0, 0, 0]);
    }

    #[test]
    fn test_wrong_signature_is_error() {
        let mut b = BinsBuilder::new();
        let off = b.cell(&vk_payload("x", 1, 0, 0), true);
        let bins = b.finish();
        let reader = HiveReader::new(&bins, 5);
        assert!(reader.read_key_node(off).is_err());
    }

    #[test]
    fn test_out_of_range_cell() {
        let bins = BinsBuilder::new().finish();
        let reader = HiveReader::new(&bins, 5);
        assert!(matches!(reader.cell(0x10_0000), Err(RegfError::CellOutOfRange(_))));
        assert!(matches!(reader.cell(NO_CELL), Err(RegfError::CellOutOfRange(_))));
    }

    #[test]
    fn test_big_data_reassembly() {
        let total = BIG_DATA_SEGMENT + 10;
        let mut b = BinsBuilder::new();
        let seg1 = b.cell(&vec![0xAA; BIG_DATA_SEGMENT], true);
        let seg2 = b.cell(&[0xBB; 10], true);
        let list = b.cell(&offsets_payload(&[seg1, seg2]), true);
        let mut db = Vec::new();
        db.extend_from_slice(&DB_SIGNATURE.to_le_bytes());
        db.extend_from_slice(&2u16.to_le_bytes());
        db.extend_from_slice(&list.to_le_bytes());
        let db_off = b.cell(&db, true);
        let vk = b.cell(&vk_payload("Blob", reg_types::REG_BINARY, total as u32, db_off), true);
        let bins = b.finish();

        let reader = HiveReader::new(&bins, 5);
        let value = reader.read_value(vk).unwrap();
        assert_eq!(value.data.len(), total);
        assert_eq!(value.data[0], 0xAA);
        assert_eq!(value.data[total - 1], 0xBB);
    }
}
