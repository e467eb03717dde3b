use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    model::{self, ModelArgs},
    run::{self, RunArgs},
};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "nvr-sim", about = "Adaptive NV relaxometry simulator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the adaptive protocol against a simulated NV with known rates.
    Run(RunArgs),
    /// Print the nine photoluminescence curves at a single wait time.
    Model(ModelArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Model(args) => model::run(&args),
    }
}
