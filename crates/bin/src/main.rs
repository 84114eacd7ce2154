use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;
mod store;

use cli::{Cli, Commands};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("arbor=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match &cli.command {
        Commands::Simulate(args) => commands::simulate::run(args, format).await,
        Commands::Tree(args) => commands::tree::run(args, format).await,
        Commands::Log(args) => commands::log::run(args, format).await,
    }
}
