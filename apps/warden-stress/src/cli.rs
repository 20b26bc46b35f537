//! Command line interface definition

use clap::Parser;
use std::path::PathBuf;

/// warden-stress - hammer the registry and job core with overlapping work
///
/// Keeps a fixed number of operation slots busy. Each operation picks one of
/// the open datasets (reopening it now and then), gets its first band and
/// reads all pixels, then checks a known pixel value.
#[derive(Parser, Debug)]
#[command(name = "warden-stress")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct Cli {
    /// Number of dataset slots
    #[arg(long, default_value_t = 20)]
    pub datasets: usize,

    /// Operations kept in flight at once
    #[arg(long, default_value_t = 50)]
    pub parallel: usize,

    /// Probability of reusing an already open dataset
    #[arg(long, default_value_t = 0.85)]
    pub keep: f64,

    /// Stop after this many operations
    #[arg(long, default_value_t = 10_000)]
    pub ops: u64,

    /// Raster width in pixels
    #[arg(long, default_value_t = 512)]
    pub width: usize,

    /// Raster height in pixels
    #[arg(long, default_value_t = 256)]
    pub height: usize,

    /// Offset of the pixel verified after each read
    #[arg(long, default_value_t = 98_500)]
    pub magic_offset: usize,

    /// Expected value at the magic offset
    #[arg(long, default_value_t = 75)]
    pub magic_value: u8,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker threads (overrides config, 0 = one per CPU)
    #[arg(long, env = "WARDEN_WORKER_THREADS")]
    pub workers: Option<usize>,

    /// Use alternate config file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}
