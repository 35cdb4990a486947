//! memvault - tagged persistent key-value store backed by SQLite.

use clap::Parser;
use std::process::ExitCode;

mod cli;
mod config;
mod error;
mod logging;
mod memory;

use cli::Commands;

fn main() -> ExitCode {
    // Initialize logging; hold the guard so buffered file logs flush on exit.
    let _guard = match logging::init() {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Parse command line arguments
    let args = Commands::parse();

    // Run the command
    match args.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
