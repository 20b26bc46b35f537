//! warden-stress - concurrency stress harness for the warden core
//!
//! Drives the registry, the lock guard and the job controller with a random
//! mix of dataset opens, band lookups and pixel reads against an in-process
//! fake raster library, then verifies every read.

mod cli;
mod error;
mod logging;
mod native;
mod stress;

use crate::cli::Cli;
use crate::error::CliError;
use crate::logging::init_tracing;
use crate::native::RasterSpec;
use crate::stress::{StressParams, StressReport};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::process;
use tracing::{error, info};
use warden_config::Config;
use warden_jobs::Runtime;

fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    if let Err(e) = run(cli) {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Main application logic
fn run(cli: Cli) -> Result<(), CliError> {
    // 1. File config (or defaults), 2. environment, 3. CLI flags
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    config.merge_env()?;
    if let Some(workers) = cli.workers {
        config.scheduler.worker_threads = workers;
    }
    if cli.json {
        config.logging.json = true;
    }

    init_tracing(config.logging.json, cli.debug, &config.logging.filter);
    info!("Starting warden-stress v{}", env!("CARGO_PKG_VERSION"));

    let params = params_from_cli(&cli)?;
    let (tx, mut rx) = warden_events::channel();
    let runtime = Runtime::with_events(config, tx)?;
    let controller = runtime.controller();

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    info!(
        workers = runtime.workers(),
        datasets = params.datasets,
        parallel = params.parallel,
        ops = params.ops,
        "stress run starting"
    );
    let report = stress::run(&controller, &params, &mut rng, &mut rx);
    let leaked = runtime.registry().len();

    drop(controller);
    runtime.shutdown();

    print_report(&report, leaked);

    if report.failed > 0 {
        return Err(CliError::Verification {
            failed: report.failed,
            total: report.ops,
        });
    }
    Ok(())
}

fn params_from_cli(cli: &Cli) -> Result<StressParams, CliError> {
    if !(0.0..=1.0).contains(&cli.keep) {
        return Err(CliError::InvalidArguments(format!(
            "--keep must be between 0 and 1, got {}",
            cli.keep
        )));
    }
    if cli.datasets == 0 || cli.parallel == 0 {
        return Err(CliError::InvalidArguments(
            "--datasets and --parallel must be positive".to_string(),
        ));
    }
    let raster = RasterSpec {
        width: cli.width,
        height: cli.height,
        bands: 1,
        magic_offset: cli.magic_offset,
        magic_value: cli.magic_value,
    };
    if raster.magic_offset >= raster.pixels() {
        return Err(CliError::InvalidArguments(format!(
            "--magic-offset {} is outside a {}x{} raster",
            cli.magic_offset, cli.width, cli.height
        )));
    }
    Ok(StressParams {
        datasets: cli.datasets,
        parallel: cli.parallel,
        keep: cli.keep,
        ops: cli.ops,
        raster,
    })
}

fn print_report(report: &StressReport, leaked: usize) {
    println!("operations:          {}", report.ops);
    println!("  verified:          {}", report.verified);
    println!("  resource gone:     {}", report.gone);
    println!("  failed:            {}", report.failed);
    println!("dataset opens:       {}", report.opens);
    println!("progress deliveries: {}", report.progress_deliveries);
    println!(
        "elapsed:             {:.2}s ({:.0} ops/s)",
        report.elapsed.as_secs_f64(),
        report.ops_per_second()
    );
    if leaked > 0 {
        println!("still registered:    {leaked}");
    }
}
