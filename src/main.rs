//! Tollgate CLI

use clap::{CommandFactory, Parser};

use tollgate::cli::request::RequestArgs;
use tollgate::cli::webhook::DeliveryArgs;
use tollgate::cli::{
    self, CacheCommands, Cli, CommandContext, Commands, GlobalOptions, WebhookCommands,
};
use tollgate::error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli).await {
        log::debug!("Command failed: {:?}", err);
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; `--debug` raises the default from warn to debug.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tollgate", &mut std::io::stdout());
            Ok(())
        }
        Commands::Request {
            client,
            endpoint,
            params,
            method,
            amount,
            attributes,
            no_cache,
        } => {
            let ctx = CommandContext::new(&opts)?;
            let args = RequestArgs {
                client: &client,
                endpoint: &endpoint,
                params: &params,
                method: &method,
                amount,
                attributes: attributes.as_deref(),
                no_cache,
            };
            cli::request::send(&ctx, args).await
        }
        Commands::Key {
            client,
            endpoint,
            params,
            method,
        } => {
            let ctx = CommandContext::new(&opts)?;
            cli::request::key(&ctx, &client, &endpoint, &params, &method)
        }
        Commands::Quota { client } => {
            let ctx = CommandContext::new(&opts)?;
            cli::quota::show(&ctx, &client)
        }
        Commands::Cache(cache_cmd) => {
            let ctx = CommandContext::new(&opts)?;
            match cache_cmd {
                CacheCommands::Status => cli::cache::status(&ctx),
                CacheCommands::Clear { client } => cli::cache::clear(&ctx, client.as_deref()),
                CacheCommands::Path => cli::cache::path(&ctx),
                CacheCommands::Table { client } => cli::cache::table(&ctx, &client),
            }
        }
        Commands::Webhook(webhook_cmd) => {
            let ctx = CommandContext::new(&opts)?;
            match webhook_cmd {
                WebhookCommands::Postback {
                    client,
                    file,
                    tag,
                    endpoint,
                    source,
                } => {
                    let args = DeliveryArgs {
                        tag: tag.as_deref(),
                        endpoint: endpoint.as_deref(),
                        source,
                    };
                    cli::webhook::postback(&ctx, &client, &file, args)
                }
                WebhookCommands::Pingback {
                    client,
                    id,
                    tag,
                    endpoint,
                    source,
                } => {
                    let args = DeliveryArgs {
                        tag: tag.as_deref(),
                        endpoint: endpoint.as_deref(),
                        source,
                    };
                    cli::webhook::pingback(&ctx, &client, &id, args).await
                }
            }
        }
    }
}
