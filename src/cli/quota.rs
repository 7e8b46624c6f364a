//! Quota command

use serde_json::json;
use tabled::Tabled;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::output::formatters::format_duration;
use crate::output::{format_table, print_json};

#[derive(Tabled)]
struct QuotaRow {
    #[tabled(rename = "CLIENT")]
    client: String,
    #[tabled(rename = "ATTEMPTS")]
    attempts: u32,
    #[tabled(rename = "LIMIT")]
    limit: u32,
    #[tabled(rename = "REMAINING")]
    remaining: u32,
    #[tabled(rename = "RESETS IN")]
    resets_in: String,
}

/// Show the open quota window of a client
pub fn show(ctx: &CommandContext, client: &str) -> Result<()> {
    let config = ctx.config.client(client)?;
    let attempts = ctx.limiter.attempts(client)?;
    let remaining = ctx.limiter.remaining(client)?.unwrap_or(config.rate_limit.attempts);
    let resets_in = ctx.limiter.available_in(client)?;

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "client": client,
            "attempts": attempts,
            "limit": config.rate_limit.attempts,
            "window_minutes": config.rate_limit.decay_minutes,
            "remaining": remaining,
            "resets_in_ms": resets_in.as_millis() as u64,
        }))?,
        OutputFormat::Table => {
            let row = QuotaRow {
                client: client.to_string(),
                attempts,
                limit: config.rate_limit.attempts,
                remaining,
                resets_in: format_duration(resets_in),
            };
            println!("{}", format_table(&[row]));
        }
        OutputFormat::Pretty => {
            println!("Client:     {}", client);
            println!(
                "Attempts:   {}/{} per {} min",
                attempts, config.rate_limit.attempts, config.rate_limit.decay_minutes
            );
            println!("Remaining:  {}", remaining);
            println!("Resets in:  {}", format_duration(resets_in));
        }
    }
    Ok(())
}
