//! Request and key commands

use colored::Colorize;
use reqwest::Method;
use serde_json::json;

use crate::cache::cache_key;
use crate::cli::args::{Param, params_object};
use crate::cli::{CommandContext, OutputFormat};
use crate::client::{ApiRequest, ApiResult};
use crate::error::{ConfigError, Result};
use crate::output::formatters::format_size;
use crate::output::print_json;

/// Options of one `request` invocation
#[derive(Debug, Clone)]
pub struct RequestArgs<'a> {
    pub client: &'a str,
    pub endpoint: &'a str,
    pub params: &'a [Param],
    pub method: &'a str,
    pub amount: u32,
    pub attributes: Option<&'a str>,
    pub no_cache: bool,
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.trim().to_uppercase().as_bytes())
        .map_err(|_| ConfigError::Invalid(format!("invalid HTTP method '{}'", method)).into())
}

/// Send a request through the mediation layer and print the envelope
pub async fn send(ctx: &CommandContext, args: RequestArgs<'_>) -> Result<()> {
    let client = ctx.client(args.client)?;

    let mut request = ApiRequest::new(parse_method(args.method)?, args.endpoint)
        .with_params(params_object(args.params))
        .with_amount(args.amount);
    if let Some(attributes) = args.attributes {
        request = request.with_attributes(attributes);
    }
    if args.no_cache {
        request = request.no_cache();
    }

    let result = client.send(&request).await?;
    print_result(ctx.format, &client.cache_key(&request), &result)
}

fn print_result(format: OutputFormat, key: &str, result: &ApiResult) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let mut view = result.to_json();
            view["cache_key"] = json!(key);
            print_json(&view)?;
        }
        _ => {
            let source = if result.is_cached {
                "cache".green()
            } else {
                "live".yellow()
            };
            println!(
                "{} {} -> {} ({}, {}, {:.3}s)",
                result.method.bold(),
                result.full_url,
                result.response_status_code,
                source,
                format_size(result.response_size),
                result.response_time
            );
            if let Some(cost) = result.cost {
                println!("Cost: {}", cost);
            }
            println!("Key:  {}", key);
            println!();
            match result.json() {
                Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
                Err(_) => println!("{}", result.body_text()),
            }
        }
    }
    Ok(())
}

/// Print the cache key a request would use
pub fn key(
    ctx: &CommandContext,
    client: &str,
    endpoint: &str,
    params: &[Param],
    method: &str,
) -> Result<()> {
    let config = ctx.config.client(client)?;
    let method = parse_method(method)?;
    let params = params_object(params);
    let key = cache_key(client, endpoint, &params, method.as_str(), &config.version);

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "client": client,
            "endpoint": endpoint.trim_matches('/'),
            "method": method.as_str(),
            "version": config.version,
            "params": params,
            "cache_key": key,
        }))?,
        _ => println!("{}", key),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method(" Post ").unwrap(), Method::POST);
        assert!(parse_method("NOT A METHOD").is_err());
    }
}
