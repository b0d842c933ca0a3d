use super::ParamArgs;
use crate::cli::output::print_json;
use anyhow::Result;
use b24_client::api::{Credential, FastListOptions, ListOptions, PlatformClient};
use clap::Args;
use colored::*;
use futures::TryStreamExt;
use serde_json::Value;
use std::time::Instant;

#[derive(Args)]
pub struct ListCommands {
    /// List method (e.g. crm.deal.list)
    pub method: String,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Fetch at most this many records
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Fail when the record count drifts from `total` by more than this
    #[arg(long)]
    pub allowable_error: Option<usize>,

    /// Pages per batch request
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Pretty print the output
    #[arg(short, long)]
    pub pretty: bool,

    /// Show the record count and elapsed time
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args)]
pub struct FastListCommands {
    /// List method registered for cursor listing (e.g. crm.deal.list)
    pub method: String,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Walk IDs from the highest down
    #[arg(long)]
    pub descending: bool,

    /// Stop after this many records
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Pages per batch request
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Show the record count and elapsed time
    #[arg(long)]
    pub stats: bool,
}

fn print_stats(count: usize, started: Instant) {
    eprintln!(
        "{} {} records in {:.2}s",
        "✓".bright_green().bold(),
        count.to_string().bright_white().bold(),
        started.elapsed().as_secs_f64()
    );
}

pub async fn handle_list_command(
    args: ListCommands,
    client: &PlatformClient,
    credential: &mut Credential,
) -> Result<()> {
    let params = args.params.to_params()?;
    let options = ListOptions {
        limit: args.limit,
        allowable_error: args.allowable_error,
        batch_size: args.batch_size,
        timeout: None,
    };

    let started = Instant::now();
    let records = client.list(credential, &args.method, params, &options).await?;
    let count = records.len();

    print_json(&Value::Array(records), args.pretty);
    if args.stats {
        print_stats(count, started);
    }
    Ok(())
}

/// Records are printed one JSON document per line as they arrive
pub async fn handle_fast_list_command(
    args: FastListCommands,
    client: &PlatformClient,
    credential: &mut Credential,
) -> Result<()> {
    let params = args.params.to_params()?;
    let mut options = FastListOptions::default()
        .descending(args.descending)
        .batch_size(args.batch_size);
    options.limit = args.limit;

    let started = Instant::now();
    let stream = client.fast_list(credential, &args.method, params, options)?;
    futures::pin_mut!(stream);

    let mut count = 0;
    while let Some(record) = stream.try_next().await? {
        println!("{}", record);
        count += 1;
    }

    if args.stats {
        print_stats(count, started);
    }
    Ok(())
}
