//! Synth command

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use keel_stack::{assemble, StackConfig};

use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Write the document here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub fn run(args: SynthArgs, config: &StackConfig) -> Result<()> {
    let stack = assemble(config)?;
    let document = stack.to_json()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, document).map_err(|e| Error::io(path, e))?;
            info!(
                path = %path.display(),
                nodes = stack.graph().len(),
                "wrote graph document"
            );
        }
        None => println!("{document}"),
    }
    Ok(())
}
