//! Output bundles and the dual CSV/JSON export.
//!
//! Layout under the output root:
//! ```text
//! <root>/<md5>/info.txt    header description (always, once the gate runs)
//! <root>/<md5>/dump.csv    tabular export
//! <root>/<md5>/dump.json   structured export, same rows as dump.csv
//! ```

use crate::engine::RecordKind;
use crate::error::{RegdropError, RegdropResult};
use crate::normalize::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const INFO_FILE: &str = "info.txt";
pub const CSV_FILE: &str = "dump.csv";
pub const JSON_FILE: &str = "dump.json";
/// Staging file name; removed after a successful export.
pub const SCRATCH_FILE: &str = "dump.tmp";

/// Separator used when flattening key paths into one column.
pub const PATH_SEPARATOR: &str = "\\";

/// Directory under which bundles are created.
#[derive(Debug, Clone)]
pub struct OutputRoot {
    root: PathBuf,
}

impl OutputRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputRoot { root: root.into() }
    }

    /// Create (or reuse) the bundle directory for a content digest.
    pub fn bundle(&self, digest: &str) -> RegdropResult<OutputBundle> {
        let dir = self.root.join(digest);
        fs::create_dir_all(&dir).map_err(|e| RegdropError::io(&dir, e))?;
        Ok(OutputBundle { dir })
    }
}

/// One input file's output directory.
#[derive(Debug, Clone)]
pub struct OutputBundle {
    dir: PathBuf,
}

impl OutputBundle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn info_path(&self) -> PathBuf {
        self.dir.join(INFO_FILE)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(CSV_FILE)
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join(JSON_FILE)
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.dir.join(SCRATCH_FILE)
    }

    /// Write the header description to `info.txt`.
    pub fn write_info(&self, description: &str) -> RegdropResult<()> {
        let path = self.info_path();
        fs::write(&path, description).map_err(|e| RegdropError::io(&path, e))
    }

    /// Delete the staging file if present; absence is not an error.
    pub fn remove_scratch(&self) -> RegdropResult<()> {
        let path = self.scratch_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("export: removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RegdropError::io(&path, e)),
        }
    }
}

/// The fixed row shape shared by `dump.csv` and `dump.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub kind: RecordKind,
    pub active: bool,
    pub offset: u64,
    pub path: String,
    pub name: String,
    pub data_type_code: Option<u32>,
    pub value: String,
    pub last_write_time: String,
}

impl From<&NormalizedRecord> for ExportRow {
    fn from(r: &NormalizedRecord) -> Self {
        ExportRow {
            kind: r.kind,
            active: r.active,
            offset: r.offset,
            path: r.path.join(PATH_SEPARATOR),
            name: r.name.clone(),
            data_type_code: r.data_type,
            value: r.value.clone(),
            last_write_time: r.last_write_time.clone().unwrap_or_default(),
        }
    }
}

fn create(path: &Path) -> RegdropResult<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| RegdropError::io(path, e))
}

fn write_csv(path: &Path, rows: &[ExportRow]) -> RegdropResult<()> {
    let mut writer = csv::Writer::from_writer(create(path)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| RegdropError::io(path, e))
}

fn write_json(path: &Path, rows: &[ExportRow]) -> RegdropResult<()> {
    let mut out = create(path)?;
    serde_json::to_writer(&mut out, rows)?;
    out.flush().map_err(|e| RegdropError::io(path, e))
}

/// Render the records into `dump.csv` and `dump.json`, then drop the staging file.
///
/// Both files are produced from the same row vector, in record order. If
/// the JSON write fails the CSV is removed again, so the pair is all or
/// nothing.
pub fn export(bundle: &OutputBundle, records: &[NormalizedRecord]) -> RegdropResult<usize> {
    let rows: Vec<ExportRow> = records.iter().map(ExportRow::from).collect();
    let csv_path = bundle.csv_path();
    write_csv(&csv_path, &rows)?;
    if let Err(e) = write_json(&bundle.json_path(), &rows) {
        if let Err(rm) = fs::remove_file(&csv_path) {
            warn!("export: cannot remove {}: {}", csv_path.display(), rm);
        }
        return Err(e);
    }
    bundle.remove_scratch()?;
    debug!("export: {} rows to {}", rows.len(), bundle.dir().display());
    Ok(rows.len())
}
