//! CLI command definitions and handlers

use clap::{Parser, Subcommand};
pub use clap_complete::Shell;
use std::net::IpAddr;
use std::path::PathBuf;

pub mod args;
pub mod cache;
pub mod context;
pub mod quota;
pub mod request;
pub mod webhook;

pub use args::{GlobalOptions, OutputFormat, Param};
pub use context::CommandContext;

/// Tollgate - cached, rate-limited mediation for metered HTTP APIs
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "TOLLGATE_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "TOLLGATE_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "TOLLGATE_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a request through the cache and quota
    #[command(after_help = "\
Examples:
  tollgate request demo search -p q=shoes -p page=1
  tollgate request seo serp/task_post --method POST -p keyword=shoes --amount 2")]
    Request {
        /// Configured client name
        client: String,

        /// Endpoint path, relative to the client's base URL and version
        endpoint: String,

        /// Request parameter as key=value (repeatable; JSON values are parsed)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<Param>,

        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,

        /// Quota units this call consumes
        #[arg(long, default_value_t = 1)]
        amount: u32,

        /// Correlation data stored with the entry
        #[arg(long)]
        attributes: Option<String>,

        /// Skip the cache lookup and do not store the response
        #[arg(long)]
        no_cache: bool,
    },

    /// Print the cache key of a request without sending it
    Key {
        /// Configured client name
        client: String,

        /// Endpoint path
        endpoint: String,

        /// Request parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<Param>,

        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// Show the quota window of a client
    Quota {
        /// Configured client name
        client: String,
    },

    /// Manage the response cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Feed a webhook delivery to the bridge
    #[command(subcommand)]
    Webhook(WebhookCommands),

    /// Generate shell completions
    #[command(after_help = "\
Examples:
  bash:   tollgate completion bash > /etc/bash_completion.d/tollgate
  zsh:    tollgate completion zsh > \"${fpath[1]}/_tollgate\"
  fish:   tollgate completion fish > ~/.config/fish/completions/tollgate.fish")]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show per-client cache statistics
    Status,
    /// Clear cached responses
    Clear {
        /// Only clear this client
        #[arg(long)]
        client: Option<String>,
    },
    /// Print cache database path
    Path,
    /// Print the storage table of a client
    Table {
        /// Configured client name
        client: String,
    },
}

/// Webhook subcommands
#[derive(Subcommand, Debug)]
pub enum WebhookCommands {
    /// Store a posted task result
    Postback {
        /// Configured client name
        client: String,

        /// File holding the delivered body (gzip or plain JSON)
        #[arg(long)]
        file: PathBuf,

        /// Correlation tag query parameter
        #[arg(long)]
        tag: Option<String>,

        /// Endpoint hint query parameter
        #[arg(long)]
        endpoint: Option<String>,

        /// Source address of the delivery
        #[arg(long)]
        source: Option<IpAddr>,
    },
    /// Fetch and store a pinged task result
    Pingback {
        /// Configured client name
        client: String,

        /// Task id
        #[arg(long)]
        id: String,

        /// Correlation tag query parameter
        #[arg(long)]
        tag: Option<String>,

        /// Endpoint hint query parameter
        #[arg(long)]
        endpoint: Option<String>,

        /// Source address of the delivery
        #[arg(long)]
        source: Option<IpAddr>,
    },
}
