//! Per-file pipeline and the worker pool that fans it out.
//!
//! classify -> gate -> engine parse -> normalize -> export. Each file runs on
//! its own worker and owns its buffers and bundle directory; a failure ends
//! that file only.

use crate::classify::is_registry_file;
use crate::config::Config;
use crate::engine::HiveEngine;
use crate::error::RegdropResult;
use crate::export::{export, OutputRoot};
use crate::gate::admit;
use crate::normalize::normalize_all;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How one input ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a regular file, or not a registry hive.
    Skipped,
    Exported { digest: String, records: usize },
}

/// Counts over a whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    fn record(&mut self, path: &Path, result: &RegdropResult<Outcome>) {
        match result {
            Ok(Outcome::Exported { .. }) => self.exported += 1,
            Ok(Outcome::Skipped) => self.skipped += 1,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                self.failed += 1;
            }
        }
    }
}

/// Run the full pipeline for one path.
pub fn process_file<E: HiveEngine>(
    engine: &E,
    root: &OutputRoot,
    path: &Path,
    recover_deleted: bool,
) -> RegdropResult<Outcome> {
    if !path.is_file() {
        warn!("{}: not a regular file, skipping", path.display());
        return Ok(Outcome::Skipped);
    }
    if !is_registry_file(path) {
        info!("{}: not a registry hive, skipping", path.display());
        return Ok(Outcome::Skipped);
    }

    let admitted = admit(engine, root, path)?;
    let tree = engine.parse(&admitted.bytes, recover_deleted)?;
    let raw = engine.export_common_format(&tree);
    debug!("{}: engine produced {} records", path.display(), raw.len());

    let records = normalize_all(raw);
    let written = export(&admitted.bundle, &records)?;
    info!(
        "{}: exported {} records to {}",
        path.display(),
        written,
        admitted.bundle.dir().display()
    );
    Ok(Outcome::Exported {
        digest: admitted.digest,
        records: written,
    })
}

/// Process every configured file on a bounded pool and report the tally.
pub fn run_all<E: HiveEngine>(engine: &E, config: &Config) -> anyhow::Result<Summary> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()?;
    let root = OutputRoot::new(&config.output);

    let results: Vec<(&PathBuf, RegdropResult<Outcome>)> = pool.install(|| {
        config
            .files
            .par_iter()
            .map(|path| (path, process_file(engine, &root, path, config.recover_deleted)))
            .collect()
    });

    let mut summary = Summary::default();
    for (path, result) in &results {
        summary.record(path, result);
    }
    info!(
        "done: {} exported, {} skipped, {} failed",
        summary.exported, summary.skipped, summary.failed
    );
    Ok(summary)
}
