use anyhow::Result;
use b24_client::api::PlatformClient;
use clap::Parser;
use log::{debug, info};
use std::process::ExitCode;
use std::time::Duration;

mod cli;
mod config;

use cli::commands::{
    handle_batch_command, handle_call_command, handle_fast_list_command, handle_list_command,
};
use cli::{Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            cli::output::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting b24");
    let config = Config::load()?;

    let mut client_config = config.client_config();
    if let Some(timeout) = cli.timeout {
        client_config.timeout = Duration::from_secs(timeout);
    }
    debug!("Request timeout: {:?}", client_config.timeout);

    let client = PlatformClient::new(client_config)?;
    let mut credential = config.credential()?;

    match cli.command {
        Commands::Call(args) => handle_call_command(args, &client, &mut credential).await,
        Commands::Batch(args) => handle_batch_command(args, &client, &mut credential).await,
        Commands::List(args) => handle_list_command(args, &client, &mut credential).await,
        Commands::FastList(args) => {
            handle_fast_list_command(args, &client, &mut credential).await
        }
    }
}
