//! Error types for Tollgate

use std::time::Duration;
use thiserror::Error;

/// Result type alias for Tollgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local quota exhausted. Never reported as a transport failure.
    #[error("Rate limit exceeded for client '{client}'. Retry after {retry_after:?}")]
    RateLimited {
        client: String,
        retry_after: Duration,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Closed set of error categories callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure or timeout during an outbound call
    Transport,
    /// Local per-client quota exhausted
    RateLimited,
    /// Invalid JSON or missing envelope fields
    MalformedResponse,
    /// Well-formed payload reporting a provider-side failure
    ProviderFailure,
    /// Inbound webhook rejected before any store attempt
    WebhookValidation,
    /// Stored or delivered bytes failed to decompress
    CompressionCorruption,
    /// Persistent store failure
    Storage,
    /// Missing or invalid configuration
    Config,
    Other,
}

impl Error {
    /// Categorize this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Api(ApiError::Network(_)) | Error::Api(ApiError::Timeout(_)) => {
                ErrorKind::Transport
            }
            Error::Api(ApiError::InvalidResponse(_)) => ErrorKind::MalformedResponse,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Cache(CacheError::CorruptBody { .. }) => ErrorKind::CompressionCorruption,
            Error::Cache(_) => ErrorKind::Storage,
            Error::Compression(_) => ErrorKind::CompressionCorruption,
            Error::Webhook(WebhookError::ProviderFailure { .. }) => ErrorKind::ProviderFailure,
            Error::Webhook(WebhookError::Decompression(_)) => ErrorKind::CompressionCorruption,
            Error::Webhook(_) => ErrorKind::WebhookValidation,
            Error::Config(_) => ErrorKind::Config,
            Error::Json(_) => ErrorKind::MalformedResponse,
            Error::Io(_) => ErrorKind::Other,
        }
    }

    /// Only transport failures are worth retrying; everything else needs a
    /// different input or a later window.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// Outbound API call errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Failed to connect to API".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Persistent cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not determine cache directory")]
    NoHome,

    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cache lock poisoned")]
    Lock,

    #[error("Cache schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: i32, expected: i32 },

    #[error("Invalid client name for storage: '{0}'")]
    InvalidClientName(String),

    #[error("Refusing to store invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Stored body of {key} is corrupt: {source}")]
    CorruptBody {
        key: String,
        source: CompressionError,
    },
}

/// Compression errors
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Compressed data is corrupt: {0}")]
    Corrupt(String),

    #[error("Compression failed: {0}")]
    Io(String),
}

/// Inbound webhook validation errors. Each one short-circuits before any store.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook source {0} is not whitelisted")]
    ForbiddenSource(String),

    #[error("Webhook body is empty")]
    EmptyBody,

    #[error("Webhook body could not be decompressed: {0}")]
    Decompression(String),

    #[error("Webhook body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Provider reported failure {code}: {message}")]
    ProviderFailure { code: i64, message: String },

    #[error("Webhook payload contains no task")]
    MissingTask,

    #[error("Webhook payload contains no task id")]
    MissingTaskId,

    #[error("Cannot resolve endpoint for task {0}")]
    UnresolvableEndpoint(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found. Create ~/.tollgate/config.yaml or pass --config.")]
    NotFound,

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Client '{0}' is not configured")]
    UnknownClient(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Cache(CacheError::Sqlite(err))
    }
}
