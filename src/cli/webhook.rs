//! Webhook replay commands
//!
//! Feed a stored or captured delivery to the bridge, e.g. to replay one that
//! was rejected.

use colored::Colorize;
use std::net::IpAddr;
use std::path::Path;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::output::print_json;
use crate::webhook::{InboundRequest, WebhookOutcome};

/// Query hints and source address of a replayed delivery
#[derive(Debug, Clone, Default)]
pub struct DeliveryArgs<'a> {
    pub tag: Option<&'a str>,
    pub endpoint: Option<&'a str>,
    pub source: Option<IpAddr>,
}

impl DeliveryArgs<'_> {
    fn apply(&self, mut request: InboundRequest) -> InboundRequest {
        if let Some(tag) = self.tag {
            request = request.with_query("tag", tag);
        }
        if let Some(endpoint) = self.endpoint {
            request = request.with_query("endpoint", endpoint);
        }
        if let Some(source) = self.source {
            request = request.with_source(source);
        }
        request
    }
}

/// Replay a postback body from a file
pub fn postback(
    ctx: &CommandContext,
    client: &str,
    file: &Path,
    args: DeliveryArgs<'_>,
) -> Result<()> {
    let bridge = ctx.bridge(client)?;
    let body = std::fs::read(file)?;
    let outcome = bridge.postback(&args.apply(InboundRequest::post(body)))?;
    print_outcome(ctx.format, &outcome)
}

/// Replay a pingback; the task is fetched from the provider
pub async fn pingback(
    ctx: &CommandContext,
    client: &str,
    task_id: &str,
    args: DeliveryArgs<'_>,
) -> Result<()> {
    let bridge = ctx.bridge(client)?;
    let fetcher = ctx.client(client)?;
    let request = args.apply(InboundRequest::get().with_query("id", task_id));
    let outcome = bridge.pingback(&request, &fetcher).await?;
    print_outcome(ctx.format, &outcome)
}

fn print_outcome(format: OutputFormat, outcome: &WebhookOutcome) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "task_id": outcome.task_id,
            "endpoint": outcome.endpoint,
            "cache_key": outcome.cache_key,
            "tag_supplied": outcome.tag_supplied,
        }))?,
        _ => {
            println!(
                "{} Stored task {} under {}",
                "✓".green(),
                outcome.task_id.bold(),
                outcome.cache_key
            );
            println!("Endpoint: {}", outcome.endpoint);
            if !outcome.tag_supplied {
                println!("Key recomputed from task parameters");
            }
        }
    }
    Ok(())
}
