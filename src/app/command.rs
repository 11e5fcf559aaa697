use super::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "lrs-forwarder", author, version, about = "Batches xAPI statements and forwards them to an LRS", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the periodic grouping, delivery and retention triggers (default)
    Run,
    /// Queue statements from a file, or stdin with `-`
    Submit {
        /// JSON array of statements or a single statement
        #[arg(long, short, default_value = "-")]
        file: PathBuf,
    },
    /// Group queued statements into batches once
    Group,
    /// Deliver queued batches once
    Deliver {
        /// Stop after this many batches, 0 for all
        #[arg(long, default_value = "0")]
        max_batches: usize,
    },
    /// Statement outcome statistics and queue depths
    Stats,
    /// Failed request statistics and log rows
    Requests,
    /// Send an empty statement array to check the LRS settings
    TestConnection,
    /// Delete outcome rows older than the given age
    Purge {
        #[arg(long)]
        older_than_days: u32,
    },
}
