//! Windows registry hive (`regf`) reader.
//!
//! This crate reads primary hive files as produced by the Windows
//! configuration manager. It provides:
//!
//! - Base block parsing, checksum computation and dirty-state detection
//! - A cell-level [`HiveReader`] (key nodes, values, subkey lists, big data)
//! - [`HiveTree`]: a full walk of the key tree, optionally including keys
//!   recovered from unallocated cells
//! - Replay of new-format (`HvLE`) transaction logs
//! - A flat common-format export of keys and values
//!
//! # Example
//!
//! ```rust,ignore
//! use regf::{BaseBlock, HiveTree};
//!
//! let image = std::fs::read("SYSTEM")?;
//! let header = BaseBlock::parse(&image)?;
//! assert!(header.is_checksum_valid());
//! let tree = HiveTree::parse(&image, true)?;
//! for record in tree.common_records() {
//!     println!("{:?} {}", record.kind, record.path.join("\\"));
//! }
//! ```

pub mod base_block;
pub mod common;
pub mod error;
pub mod log;
pub mod marvin;
pub mod reader;
pub mod tree;
mod util;

// Re-export key types at crate root.
pub use base_block::{compute_checksum, BaseBlock, BASE_BLOCK_SIZE, REGF_MAGIC, REGF_SIGNATURE};
pub use common::{hex_bytes, CommonKind, CommonRecord};
pub use error::{RegfError, RegfResult};
pub use log::{parse_log, replay_logs, DirtyPage, LogEntry};
pub use reader::{reg_types, HiveReader, KeyNode, KeyValue};
pub use tree::{HiveTree, TreeKey};
pub use util::filetime_to_datetime;
