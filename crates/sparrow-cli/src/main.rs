//! Sparrow CLI - a command-line driver for the bytecode VM and IR builder.
//!
//! Parses arguments, loads configuration, installs the `tracing` subscriber,
//! and dispatches to `run`/`dump-ir`. This is the only crate in the
//! workspace that parses TOML, installs a global logging subscriber, or
//! links `clap` — every other crate is a library consumed through plain
//! function calls.

mod assemble;
mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::SparrowConfig;

/// Sparrow - a register-plus-stack bytecode VM with a sea-of-nodes IR builder
#[derive(Parser, Debug)]
#[command(name = "sparrow")]
#[command(author = "Sparrow Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Sparrow bytecode or inspect its lifted IR", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true, env = "SPARROW_VERBOSE")]
    verbose: bool,

    /// Path to a sparrow.toml config file (search order otherwise: cwd, then
    /// the user config dir, then home)
    #[arg(long, global = true, env = "SPARROW_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured GC threshold
    #[arg(long, global = true)]
    gc_threshold: Option<usize>,

    /// Override the configured GC ratio
    #[arg(long, global = true)]
    gc_ratio: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assemble, load, and execute a module
    Run {
        /// Path to a bytecode-assembly source file
        file: PathBuf,
    },
    /// Build the IR graph for a module and print its shape
    DumpIr {
        /// Path to a bytecode-assembly source file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => SparrowConfig::load_from_path(path)?,
        None => SparrowConfig::load()?,
    };
    config.gc = config.gc.with_overrides(cli.gc_threshold, cli.gc_ratio);
    if cli.verbose {
        config.verbose = true;
    }

    match cli.command {
        Commands::Run { file } => commands::run::run(&file, config.gc_config(), config.stack),
        Commands::DumpIr { file } => commands::dump_ir::dump_ir(&file),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { EnvFilter::new("debug") } else { EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")) };

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(false)).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_a_file_argument() {
        let cli = Cli::parse_from(["sparrow", "run", "script.sasm"]);
        assert!(matches!(cli.command, Commands::Run { .. }));
    }

    #[test]
    fn parses_dump_ir_with_a_file_argument() {
        let cli = Cli::parse_from(["sparrow", "dump-ir", "script.sasm"]);
        assert!(matches!(cli.command, Commands::DumpIr { .. }));
    }

    #[test]
    fn parses_global_verbose_and_gc_overrides() {
        let cli = Cli::parse_from(["sparrow", "--verbose", "--gc-threshold", "1024", "run", "script.sasm"]);
        assert!(cli.verbose);
        assert_eq!(cli.gc_threshold, Some(1024));
    }
}
