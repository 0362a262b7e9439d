use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "pipeline")]
#[command(about = "Manga chapter download pipeline")]
pub struct Cli {
    /// Configuration file (RON). Missing file means defaults.
    #[arg(long, default_value = "pipeline.ron")]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Log file path (defaults to ./pipeline.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Fetch a URL through the escalation chain and print the body
    Fetch {
        url: String,
        /// Site root used for token refresh (defaults to the URL's origin)
        #[arg(long)]
        base_url: Option<String>,
        /// Render in the browser and wait for this CSS selector
        #[arg(long)]
        selector: Option<String>,
        /// Route through the configured SOCKS proxy
        #[arg(long, default_value_t = false)]
        proxy: bool,
    },
    /// Print the persisted download queue
    Queue,
    /// Package a completed chapter from the queue history as CBZ
    Export { chapter_url: String },
    /// Resolve a host through DNS-over-HTTPS
    Resolve { host: String },
}
