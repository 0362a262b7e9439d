mod cli;
mod commands;

use clap::Parser;
use log::LevelFilter;
use pipeline_logging::LogDestination;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    pipeline_logging::initialize(LogDestination::Both, level, cli.log_file.as_deref());
    commands::run(cli).await
}
