use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "warden-server", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Serve,
    /// Print a service token for calling `target` as this service.
    IssueToken {
        #[arg(long)]
        target: String,
    },
    /// Load and validate the configuration, then print a summary.
    CheckConfig,
}
