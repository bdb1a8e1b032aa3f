use anyhow::Result;
use clap::Parser;
use rlgen_api::{config::ConvGruSpec, conv_gru, logger::init_tracing};
use std::path::PathBuf;
use tracing::info;

/// Trains the action conditioned conv-GRU video predictor.
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
    let spec = ConvGruSpec::from_path(&cli.experiment)?;
    let summary = conv_gru::run(spec)?;
    info!(
        "finished {} iterations with {} optimizer steps",
        summary.iterations, summary.optimizer_steps
    );
    Ok(())
}
