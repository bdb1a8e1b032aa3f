use anyhow::Result;
use clap::Parser;
use rlgen_api::{config::SacSpec, logger::init_tracing, sac};
use std::path::PathBuf;

/// Soft actor critic whose networks see the environment's true meta variables.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the experiment yaml file
    #[arg(short, long)]
    experiment: PathBuf,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let spec = SacSpec::from_path(&cli.experiment)?;
    sac::run(spec)
}
