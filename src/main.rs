//! keel CLI
//!
//! Synthesizes the EKS platform graph from a stack config.

use std::process::ExitCode;

use clap::Parser;

use keel::telemetry::init_logging;
use keel::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }
    match cli.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
