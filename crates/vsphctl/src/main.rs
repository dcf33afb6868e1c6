use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
use commands::Cli;

/// Verbose log of every run, kept after exit.
const FILE_LOG_FILTER: &str = "vsphctl=debug,vsphere_manager=debug,info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_path = init_tracing()?;

    let result = cli.run().await;
    if let Err(report) = &result {
        let chain: Vec<String> = report.chain().map(ToString::to_string).collect();
        error!(error = %report, causes = ?chain, "command failed");
        eprintln!("Details logged to {}", log_path.display());
    }
    result
}

/// Debug-level log to a kept temp file, plus the compact stderr log (`RUST_LOG`, default `warn`).
fn init_tracing() -> Result<PathBuf> {
    let (file, path) = tempfile::Builder::new()
        .prefix("vsphctl")
        .suffix(".txt")
        .tempfile()
        .into_diagnostic()?
        .keep()
        .into_diagnostic()?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_filter(EnvFilter::new(FILE_LOG_FILTER));

    // Compact format, no timestamps, no targets
    let stderr_layer = fmt::layer()
        .compact()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(path)
}
