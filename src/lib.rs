//! keel CLI library

pub mod commands;
pub mod error;
pub mod telemetry;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use telemetry::LogFormat;

/// keel - declarative EKS platform graph synthesizer
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Stack config file (falls back to $KEEL_CONFIG, then ./keel.yaml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log line format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text, env = "KEEL_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Assemble the stack and write the graph document
    Synth(commands::synth::SynthArgs),
    /// Check the config and report trust gaps without writing anything
    Validate(commands::validate::ValidateArgs),
    /// Evaluate stack outputs against a state file of applied attributes
    Outputs(commands::outputs::OutputsArgs),
}

impl Cli {
    /// Run the CLI command
    pub fn run(self) -> Result<()> {
        let config = keel_stack::StackConfig::load_or_default(self.config.as_deref())?;
        match self.command {
            Commands::Synth(args) => commands::synth::run(args, &config),
            Commands::Validate(args) => commands::validate::run(args, &config),
            Commands::Outputs(args) => commands::outputs::run(args, &config),
        }
    }
}
