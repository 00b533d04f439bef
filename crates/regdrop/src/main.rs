//! regdrop: registry hive integrity preflight and typed value export.
//!
//! Each input hive is checked (magic, header checksum, sequence numbers),
//! reconciled with its transaction logs when dirty, parsed, and exported to
//! `<output>/<md5>/` as `info.txt`, `dump.csv` and `dump.json`.

mod classify;
mod config;
mod digest;
mod engine;
mod error;
mod export;
mod gate;
mod normalize;
mod pipeline;

use clap::Parser;
use config::{Cli, Config, USAGE};
use engine::RegfEngine;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the usage text.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from(Cli::parse());
    if config.files.is_empty() {
        println!("{}", USAGE);
        return Ok(());
    }

    tracing::debug!(
        "regdrop: {} file(s), {} worker(s), output {}",
        config.files.len(),
        config.jobs,
        config.output.display()
    );
    pipeline::run_all(&RegfEngine, &config)?;
    Ok(())
}
