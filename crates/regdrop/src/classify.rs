//! Cheap format sniffing: is this file a registry hive at all?

use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// "regf" read as a little-endian u32.
pub const HIVE_MAGIC: u32 = 0x6667_6572;

/// True iff `bytes` starts with the hive magic.
pub fn has_hive_magic(bytes: &[u8]) -> bool {
    match bytes.get(..4) {
        Some(head) => u32::from_le_bytes([head[0], head[1], head[2], head[3]]) == HIVE_MAGIC,
        None => false,
    }
}

/// Read exactly the first four bytes of `path` and compare with the hive magic.
///
/// Files shorter than four bytes are rejected without being opened. Any
/// I/O failure yields `false`.
pub fn is_registry_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() >= 4 => {}
        Ok(_) => return false,
        Err(e) => {
            debug!("classify: cannot stat {}: {}", path.display(), e);
            return false;
        }
    }

    let mut head = [0u8; 4];
    match File::open(path).and_then(|mut f| f.read_exact(&mut head)) {
        Ok(()) => has_hive_magic(&head),
        Err(e) => {
            debug!("classify: cannot read {}: {}", path.display(), e);
            false
        }
    }
}
