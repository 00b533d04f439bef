//! Integrity gate: header report, checksum verdict and the log-replay decision.

use crate::digest::digest_bytes;
use crate::engine::HiveEngine;
use crate::error::{RegdropError, RegdropResult};
use crate::export::{OutputBundle, OutputRoot};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A hive that passed the gate, ready to hand to the engine's parser.
#[derive(Debug)]
pub struct Admitted {
    pub digest: String,
    pub bundle: OutputBundle,
    /// Hive bytes, already reconciled with the transaction logs when dirty.
    pub bytes: Vec<u8>,
}

/// Transaction logs sitting next to `hive`.
///
/// Matches `<stem>.LOG?` and `<file name>.LOG?` case-insensitively, where `?`
/// is exactly one character. Sorted by path.
pub fn find_transaction_logs(hive: &Path) -> Vec<PathBuf> {
    let Some(file_name) = hive.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let mut prefixes = vec![format!("{}.log", file_name.to_lowercase())];
    if let Some(stem) = hive.file_stem().and_then(|s| s.to_str()) {
        if stem != file_name {
            prefixes.push(format!("{}.log", stem.to_lowercase()));
        }
    }

    let dir = match hive.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("gate: cannot list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut logs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            prefixes.iter().any(|prefix| {
                name.strip_prefix(prefix.as_str())
                    .map(|rest| rest.chars().count() == 1)
                    .unwrap_or(false)
            })
        })
        .map(|entry| entry.path())
        .collect();
    logs.sort();
    logs
}

/// Run the gate for one file.
///
/// The bundle is created only once the header reads, and `info.txt` is
/// written before any verdict, so every bundle carries its report. A dirty
/// hive is only admitted after a strict replay of its logs.
pub fn admit<E: HiveEngine>(engine: &E, root: &OutputRoot, path: &Path) -> RegdropResult<Admitted> {
    let bytes = fs::read(path).map_err(|e| RegdropError::io(path, e))?;
    let header = engine.read_header(&bytes)?;
    let digest = digest_bytes(&bytes);
    let bundle = root.bundle(&digest)?;
    bundle.write_info(&header.to_string())?;
    debug!(
        "gate: {} signature {:#010x}, sequence {}/{}",
        path.display(),
        header.signature,
        header.primary_sequence,
        header.secondary_sequence
    );

    if !engine.validate_checksum(&header) {
        return Err(RegdropError::ChecksumInvalid {
            stored: header.checksum,
        });
    }

    if header.is_clean() {
        return Ok(Admitted {
            digest,
            bundle,
            bytes,
        });
    }

    let logs = find_transaction_logs(path);
    if logs.is_empty() {
        return Err(RegdropError::LogsMissing {
            primary: header.primary_sequence,
            secondary: header.secondary_sequence,
        });
    }

    info!(
        "gate: {} is dirty ({} != {}), replaying {} log(s)",
        path.display(),
        header.primary_sequence,
        header.secondary_sequence,
        logs.len()
    );
    let bytes = engine.replay_logs(&bytes, &logs, true)?;
    Ok(Admitted {
        digest,
        bundle,
        bytes,
    })
}
