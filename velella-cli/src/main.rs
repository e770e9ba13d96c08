//! Velella CLI entry point.
//!
//! Builds MRES contact matrices from text interactions (`load`) and
//! produces random subsamples of existing matrices (`sample`).
//!
//! Exit codes: 0 on success, 1 on usage or validation errors, 2 on I/O or
//! corrupt-data errors.

use std::path::Path;

use clap::{Parser, Subcommand};

use velella_core::Error;

mod load;
mod sample;

#[derive(Parser)]
#[command(name = "velella")]
#[command(about = "Read, build, and transform sparse Hi-C contact matrices")]
#[command(version)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an MRES file from interactions in various text formats
    Load(load::LoadArgs),
    /// Randomly subsample the interactions of an MRES file
    Sample(sample::SampleArgs),
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Load(args) => load::run(args),
        Commands::Sample(args) => sample::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(e: &Error) -> i32 {
    match e {
        Error::Io(_) | Error::Corrupt(_) => 2,
        _ => 1,
    }
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// File-path part of a `path::/group` output URI.
pub(crate) fn output_file_path(uri: &str) -> &Path {
    Path::new(uri.split_once("::").map_or(uri, |(path, _)| path))
}

/// Delete a partially written output unless it predates this run. Group
/// URIs are left alone (the container belongs to the user).
pub(crate) fn discard_partial_output(uri: &str, existed_before: bool) {
    if uri.contains("::") || existed_before {
        return;
    }
    let path = output_file_path(uri);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("failed to remove partial output {}: {e}", path.display());
        }
    }
}
