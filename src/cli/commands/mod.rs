pub mod batch;
pub mod call;
pub mod list;

use anyhow::{Context, Result};
use b24_client::api::params::{self, Params};
use clap::Args;
use serde_json::Value;

pub use batch::{BatchCommands, handle_batch_command};
pub use call::{CallCommands, handle_call_command};
pub use list::{FastListCommands, ListCommands, handle_fast_list_command, handle_list_command};

/// Method parameters given on the command line
#[derive(Args, Debug, Clone, Default)]
pub struct ParamArgs {
    /// Parameters as JSON (e.g. '{"filter": {"STAGE_ID": "WON"}}')
    #[arg(short, long)]
    pub json: Option<String>,

    /// Parameters in bracketed form encoding (e.g. 'filter[STAGE_ID]=WON&select[]=ID')
    #[arg(short, long, conflicts_with = "json")]
    pub query: Option<String>,
}

impl ParamArgs {
    pub fn to_params(&self) -> Result<Params> {
        if let Some(json) = &self.json {
            let value: Value =
                serde_json::from_str(json).context("Failed to parse --json parameters")?;
            return Ok(Params::from(value));
        }
        if let Some(query) = &self.query {
            return Ok(query_params(query));
        }
        Ok(Params::new())
    }
}

/// Decode a bracketed query string into parameters
pub fn query_params(query: &str) -> Params {
    Params::from(params::decode(query).to_json())
}
