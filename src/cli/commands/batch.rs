use super::query_params;
use crate::cli::output::print_json;
use anyhow::{Context, Result};
use b24_client::api::{BatchOptions, Credential, PlatformClient, SubCall, SubCalls};
use clap::Args;
use colored::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct BatchCommands {
    /// Sub-call as `method?query` or `name=method?query` (repeatable)
    #[arg(short = 'c', long = "cmd")]
    pub commands: Vec<String>,

    /// JSON file with `[method, params]` / `[name, method, params]` entries,
    /// or an object mapping names to `[method, params]`
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Stop at the first failing sub-call
    #[arg(long)]
    pub halt: bool,

    /// Sub-calls per physical request
    #[arg(long, default_value_t = 50)]
    pub chunk_size: usize,

    /// Pretty print the output
    #[arg(short, long)]
    pub pretty: bool,
}

/// Parse `name=method?query`. A `=` only names the call when it comes before any `?`.
pub fn parse_command(text: &str) -> Result<SubCall> {
    let text = text.trim();
    let (name, rest) = match (text.find('='), text.find('?')) {
        (Some(eq), Some(q)) if eq < q => (Some(&text[..eq]), &text[eq + 1..]),
        (Some(eq), None) => (Some(&text[..eq]), &text[eq + 1..]),
        _ => (None, text),
    };
    let (method, query) = rest.split_once('?').unwrap_or((rest, ""));
    if method.is_empty() {
        anyhow::bail!("Sub-call has no method: {}", text);
    }
    let params = query_params(query);
    Ok(match name {
        Some(name) => SubCall::named(name, method, params),
        None => SubCall::new(method, params),
    })
}

/// Read sub-calls from a JSON document
pub fn parse_file(content: &str) -> Result<SubCalls> {
    let value: Value = serde_json::from_str(content).context("Batch file is not valid JSON")?;
    let mut calls = SubCalls::new();
    match value {
        Value::Array(items) => {
            for item in &items {
                let call = SubCall::from_json(item)
                    .with_context(|| format!("Invalid sub-call: {}", item))?;
                calls.push(call);
            }
        }
        Value::Object(map) => {
            for (name, item) in &map {
                let mut call = SubCall::from_json(item)
                    .with_context(|| format!("Invalid sub-call {}: {}", name, item))?;
                call.name = Some(name.clone());
                calls.push(call);
            }
        }
        other => anyhow::bail!("Batch file must hold an array or an object, got {}", other),
    }
    Ok(calls)
}

pub async fn handle_batch_command(
    args: BatchCommands,
    client: &PlatformClient,
    credential: &mut Credential,
) -> Result<()> {
    let mut calls = match &args.file {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
            parse_file(&content)?
        }
        None => SubCalls::new(),
    };
    for command in &args.commands {
        calls.push(parse_command(command)?);
    }
    if calls.is_empty() {
        anyhow::bail!("Nothing to run. Pass --cmd or --file.");
    }

    let options = BatchOptions {
        halt: args.halt,
        ..BatchOptions::default()
    }
    .chunk_size(args.chunk_size);

    let results = client.batch(credential, calls, &options).await?;

    let failed = results.errors().len();
    print_json(&results.to_json(), args.pretty);
    if failed > 0 {
        eprintln!(
            "{} {} of {} sub-calls failed",
            "!".bright_yellow().bold(),
            failed,
            results.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use b24_client::api::Params;

    #[test]
    fn test_parse_named_command() {
        let call = parse_command("deals=crm.deal.list?filter[STAGE_ID]=WON").unwrap();
        assert_eq!(call.name.as_deref(), Some("deals"));
        assert_eq!(call.method, "crm.deal.list");
        assert_eq!(
            call.params,
            Params::new().with("filter", Params::new().with("STAGE_ID", "WON"))
        );
    }

    #[test]
    fn test_parse_positional_command() {
        let call = parse_command("crm.deal.get?id=5").unwrap();
        assert_eq!(call.name, None);
        assert_eq!(call.params, Params::new().with("id", "5"));

        let call = parse_command("user.current").unwrap();
        assert_eq!(call.method, "user.current");
        assert!(call.params.is_empty());

        assert!(parse_command("name=").is_err());
    }

    #[test]
    fn test_parse_file() {
        let calls = parse_file(r#"{"a": ["crm.deal.get", {"id": 1}], "b": ["user.current"]}"#).unwrap();
        let names: Vec<_> = calls.iter().map(|c| c.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let calls = parse_file(r#"[["crm.deal.get", {"id": 1}], ["x", "user.current", {}]]"#).unwrap();
        assert_eq!(calls.len(), 2);

        assert!(parse_file("[1, 2]").is_err());
        assert!(parse_file("\"text\"").is_err());
    }
}
