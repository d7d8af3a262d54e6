//! bidsqc CLI: AFNI QC figures for a BIDS derivatives dataset.
//!
//! Indexes the dataset, builds one uvar record per subject, runs the AFNI
//! QC report tool and collects the resulting images under the output
//! directory.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
