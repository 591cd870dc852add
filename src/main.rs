//! studyforge CLI entry point.
//!
//! Initializes logging (terminal plus an optional per-invocation log file)
//! and delegates to the CLI module for command handling.

use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;

use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first to get log_level
    let cli = studyforge::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    let log_file = cli.log_file_path().and_then(|path| {
        let file = path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| File::create(&path));
        match file {
            Ok(file) => Some((path, file)),
            Err(e) => {
                eprintln!("Cannot create log file {}: {}", path.display(), e);
                None
            }
        }
    });
    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    let file_layer = log_file.map(|(_, file)| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    if let Some(path) = log_path {
        tracing::debug!("Writing log to {}", path.display());
    }

    match studyforge::cli::run_with_cli(cli).await {
        Ok(code) => ExitCode::from(code.code()),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(studyforge::workflow::ReturnCode::Failure.code())
        }
    }
}
