//! Command-line configuration.

use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub const USAGE: &str = "usage: regdrop [FILE]...\n\
Export registry hive keys and values to regdrop/<md5>/dump.csv and dump.json.";

#[derive(Debug, Parser)]
#[command(
    name = "regdrop",
    about = "Registry hive integrity preflight and typed value export"
)]
pub struct Cli {
    /// Candidate hive files
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Directory that receives one <md5> bundle per input
    #[arg(short, long, env = "REGDROP_OUTPUT", default_value = "regdrop")]
    pub output: PathBuf,

    /// Worker threads. Defaults to the available processor count
    #[arg(short, long, env = "REGDROP_JOBS")]
    pub jobs: Option<NonZeroUsize>,

    /// Skip recovery of deleted keys from unallocated cells
    #[arg(long)]
    pub no_recover_deleted: bool,
}

/// Resolved run settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub files: Vec<PathBuf>,
    pub output: PathBuf,
    pub jobs: usize,
    pub recover_deleted: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let jobs = cli
            .jobs
            .or_else(|| std::thread::available_parallelism().ok())
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Config {
            files: cli.files,
            output: cli.output,
            jobs,
            recover_deleted: !cli.no_recover_deleted,
        }
    }
}
