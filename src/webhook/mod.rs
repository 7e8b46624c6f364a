//! Webhook receivers for asynchronous task results
//!
//! Providers deliver finished tasks either by posting the whole result
//! (postback) or by pinging with a task id so the result can be fetched
//! (pingback). Both paths end in the same place: the result is stored under
//! the cache key of the request that created the task.

use async_trait::async_trait;

use crate::error::Result;

pub mod bridge;
pub mod inbound;
pub mod payload;

pub use bridge::{WebhookBridge, WebhookOutcome};
pub use inbound::InboundRequest;
pub use payload::{TaskResult, endpoint_from_path, parse_task, resolve_tag, task_params};

/// Re-fetches a finished task from its provider (pingback path)
#[async_trait]
pub trait TaskFetcher: Send + Sync {
    /// Raw response body of `GET {endpoint}/{task_id}`
    async fn fetch_task(&self, endpoint: &str, task_id: &str) -> Result<Vec<u8>>;
}
