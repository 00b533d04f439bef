//! Error types for the regf crate.

use thiserror::Error;

/// Hive parsing and log replay errors.
#[derive(Debug, Error)]
pub enum RegfError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("data truncated: need {needed} bytes at offset {offset:#x}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("bad signature at offset {offset:#x}: expected {expected}, found {found:?}")]
    BadSignature {
        offset: usize,
        expected: &'static str,
        found: [u8; 4],
    },

    #[error("cell offset {0:#x} is outside the hive bins area")]
    CellOutOfRange(u32),

    #[error("invalid cell at {offset:#x}: {msg}")]
    InvalidCell { offset: u32, msg: String },

    #[error("transaction log {log}: {msg}")]
    Log { log: String, msg: String },

    #[error("unsupported transaction log format in {0} (legacy DIRT log)")]
    UnsupportedLogFormat(String),
}

impl RegfError {
    pub(crate) fn invalid_cell(offset: u32, msg: impl Into<String>) -> Self {
        RegfError::InvalidCell {
            offset,
            msg: msg.into(),
        }
    }

    pub(crate) fn log(log: impl Into<String>, msg: impl Into<String>) -> Self {
        RegfError::Log {
            log: log.into(),
            msg: msg.into(),
        }
    }
}

pub type RegfResult<T> = Result<T, RegfError>;
