//! Mock task fetcher for testing
//!
//! Serves canned task result bodies to the webhook bridge without making
//! real API calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ApiError, Result};
use crate::webhook::TaskFetcher;

/// Mock fetcher for pingback tests.
///
/// # Example
/// ```ignore
/// let fetcher = MockTaskFetcher::new().with_task("T1", body);
/// let bytes = fetcher.fetch_task("serp/task_get/advanced", "T1").await?;
/// ```
#[derive(Default, Clone)]
pub struct MockTaskFetcher {
    /// Bodies by task id
    tasks: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// `(endpoint, task_id)` of every fetch, in order
    fetches: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockTaskFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `task_id`
    pub fn with_task(self, task_id: &str, body: impl Into<Vec<u8>>) -> Self {
        // Only called while building, before the mock is shared
        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.insert(task_id.to_string(), body.into());
        }
        self
    }

    /// Recorded fetches
    pub async fn fetches(&self) -> Vec<(String, String)> {
        self.fetches.lock().await.clone()
    }
}

#[async_trait]
impl TaskFetcher for MockTaskFetcher {
    async fn fetch_task(&self, endpoint: &str, task_id: &str) -> Result<Vec<u8>> {
        self.fetches
            .lock()
            .await
            .push((endpoint.to_string(), task_id.to_string()));

        self.tasks
            .lock()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse(format!("unknown task {}", task_id)).into())
    }
}
