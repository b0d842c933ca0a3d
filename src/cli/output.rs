//! Terminal output for command results and errors

use b24_client::api::Error as ApiClientError;
use colored::*;
use serde_json::Value;

pub fn print_json(value: &Value, pretty: bool) {
    let text = if pretty {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    };
    println!("{}", text);
}

/// Print a failed command. Client errors are shown as their structured payload.
pub fn print_error(error: &anyhow::Error) {
    match error.downcast_ref::<ApiClientError>() {
        Some(api_error) => {
            let payload = api_error.to_payload();
            let label = if payload.transient {
                "Platform unavailable".bright_yellow().bold()
            } else {
                "Request failed".bright_red().bold()
            };
            eprintln!("{} {}", "✗".bright_red().bold(), label);
            match serde_json::to_string_pretty(&payload) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}", api_error.to_string().red()),
            }
        }
        None => {
            eprintln!("{} {}", "✗".bright_red().bold(), format!("{:#}", error).red());
        }
    }
}
