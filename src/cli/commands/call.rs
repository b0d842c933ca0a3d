use super::ParamArgs;
use crate::cli::output::print_json;
use anyhow::Result;
use b24_client::api::{Credential, PlatformClient};
use clap::Args;
use log::debug;
use serde_json::json;

#[derive(Args)]
pub struct CallCommands {
    /// REST method (e.g. crm.deal.get)
    pub method: String,

    #[command(flatten)]
    pub params: ParamArgs,

    /// Print next, total and time alongside the result
    #[arg(long)]
    pub full: bool,

    /// Pretty print the output
    #[arg(short, long)]
    pub pretty: bool,
}

pub async fn handle_call_command(
    args: CallCommands,
    client: &PlatformClient,
    credential: &mut Credential,
) -> Result<()> {
    let params = args.params.to_params()?;
    debug!("Calling {} with {} parameters", args.method, params.len());

    let response = client.call(credential, &args.method, params).await?;

    if args.full {
        let value = json!({
            "result": response.result,
            "next": response.next,
            "total": response.total,
            "time": response.time,
        });
        print_json(&value, args.pretty);
    } else {
        print_json(&response.result, args.pretty);
    }
    Ok(())
}
