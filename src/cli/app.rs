use super::commands::{BatchCommands, CallCommands, FastListCommands, ListCommands};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "b24")]
#[command(about = "A CLI tool for calling the Bitrix24 REST API")]
pub struct Cli {
    /// Request timeout in seconds (overrides config and B24_TIMEOUT)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Call a single REST method
    Call(CallCommands),
    /// Run several methods in one batch request
    Batch(BatchCommands),
    /// Fetch every page of a list method
    List(ListCommands),
    /// Stream a list method using ID cursors
    FastList(FastListCommands),
}
