//! Error types for the regdrop pipeline.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-file pipeline failures. None of these abort sibling files.
#[derive(Debug, Error)]
pub enum RegdropError {
    /// I/O error with the path it happened on.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored header checksum does not match the recomputed one.
    #[error("checksum validation error (stored {stored:#010x})")]
    ChecksumInvalid { stored: u32 },

    /// Dirty hive and no `<name>.LOG?` file next to it.
    #[error("transaction logs missing (primary sequence {primary}, secondary sequence {secondary})")]
    LogsMissing { primary: u32, secondary: u32 },

    /// Strict log replay could not reconcile the hive.
    #[error("transaction log replay failed: {0}")]
    Replay(String),

    /// The hive engine could not read or parse the hive.
    #[error("hive engine error: {0}")]
    Engine(String),

    /// A value payload token is not a hexadecimal byte.
    #[error("malformed hex token {token:?} in value payload")]
    MalformedHex { token: String },

    /// Writing `dump.csv` or `dump.json` failed.
    #[error("export error: {0}")]
    Export(String),
}

impl RegdropError {
    /// Create an Io error bound to a path.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        RegdropError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<csv::Error> for RegdropError {
    fn from(e: csv::Error) -> Self {
        RegdropError::Export(format!("csv: {}", e))
    }
}

impl From<serde_json::Error> for RegdropError {
    fn from(e: serde_json::Error) -> Self {
        RegdropError::Export(format!("json: {}", e))
    }
}

/// Result type for pipeline operations.
pub type RegdropResult<T> = Result<T, RegdropError>;
