//! # breakmaps CLI
//!
//! Buries a read-only page one step below the lowest mapping of the process,
//! backed by a file that sits at the bottom of millions of nested directories.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use breakmaps_config::logging::{init_logging, LogLevel};
use breakmaps_config::{log_preflight_info, Config};
use clap::Parser;

mod preflight;
mod progress;
mod run;

/// Stress the kernel's path handling for memory mappings
#[derive(Parser)]
#[command(name = "breakmaps")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory to descend from (defaults to the current directory)
    #[arg(value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Number of nested directories to create
    #[arg(long)]
    max_depth: Option<u64>,

    /// Read settings from FILE instead of ~/.breakmaps/config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only run the capacity check
    #[arg(long)]
    check: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    // Children of the runner must not inherit an ignored SIGPIPE.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("breakmaps: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(LogLevel::parse(&config.logging.level).unwrap_or(LogLevel::Info));

    if cli.print_config {
        eprint!("{}", config.to_toml());
        return ExitCode::SUCCESS;
    }

    let result = preflight::run_preflight(cli.directory.as_deref(), &config.descent);
    if cli.check {
        preflight::print_capacity(&result, &config.descent);
    }
    if !result.can_start {
        preflight::print_preflight_errors(&result);
        return ExitCode::FAILURE;
    }
    if cli.check {
        return ExitCode::SUCCESS;
    }

    log_preflight_info!(
        "starting",
        dir = result.start_dir.display().to_string(),
        max_depth = config.descent.max_depth
    );

    match run::run(&config) {
        0 => ExitCode::SUCCESS,
        code => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("could not load config {}", path.display()))?,
        None => Config::load().context("could not load config")?,
    };
    if let Some(max_depth) = cli.max_depth {
        config.descent.max_depth = max_depth;
        config.validate().context("invalid --max-depth")?;
    }
    Ok(config)
}
