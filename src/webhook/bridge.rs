//! Webhook bridge: files asynchronous task results under cache keys

use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::TaskFetcher;
use super::inbound::InboundRequest;
use super::payload::{TaskResult, endpoint_from_path, parse_task, resolve_tag, task_params};
use crate::cache::CacheManager;
use crate::cache::compression::{decompress, is_compressed};
use crate::client::{ApiResult, RawResponse};
use crate::config::{ClientConfig, WebhookConfig};
use crate::error::{Result, WebhookError};

/// Where a delivered task result ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub task_id: String,
    pub endpoint: String,
    pub cache_key: String,
    /// Whether the key came from a supplied tag rather than recomputation
    pub tag_supplied: bool,
}

/// Webhook receiver for one client.
pub struct WebhookBridge {
    client: String,
    base_url: String,
    version: String,
    config: WebhookConfig,
    cache: Arc<CacheManager>,
}

impl WebhookBridge {
    pub fn new(client: &str, config: &ClientConfig, cache: Arc<CacheManager>) -> Self {
        Self {
            client: client.to_string(),
            base_url: config.base_url.clone(),
            version: config.version.clone(),
            config: config.webhook.clone(),
            cache,
        }
    }

    /// Handle a delivery carrying the full task result.
    ///
    /// Query parameters `tag` and `endpoint` are optional hints.
    pub fn postback(&self, request: &InboundRequest) -> Result<WebhookOutcome> {
        let outcome = self.try_postback(request);
        if let Err(e) = &outcome {
            self.log_rejection("postback", request, e);
        }
        outcome
    }

    /// Handle a completion ping: `id` (required), `tag` and `endpoint`
    /// query parameters. The result is fetched through `fetcher`.
    pub async fn pingback(
        &self,
        request: &InboundRequest,
        fetcher: &dyn TaskFetcher,
    ) -> Result<WebhookOutcome> {
        let outcome = self.try_pingback(request, fetcher).await;
        if let Err(e) = &outcome {
            self.log_rejection("pingback", request, e);
        }
        outcome
    }

    fn try_postback(&self, request: &InboundRequest) -> Result<WebhookOutcome> {
        self.check_source(request)?;
        if request.body.is_empty() {
            return Err(WebhookError::EmptyBody.into());
        }

        let body = self.decode_body(&request.body, request.is_gzip_encoded())?;
        self.accept(request, body)
    }

    async fn try_pingback(
        &self,
        request: &InboundRequest,
        fetcher: &dyn TaskFetcher,
    ) -> Result<WebhookOutcome> {
        self.check_source(request)?;
        let task_id = request
            .query_param("id")
            .ok_or(WebhookError::MissingTaskId)?;

        let endpoint = match request.query_param("endpoint") {
            Some(hint) => hint.trim_matches('/').to_string(),
            None => self
                .cache
                .find_endpoint_for_task(&self.client, task_id)?
                .ok_or_else(|| WebhookError::UnresolvableEndpoint(task_id.to_string()))?,
        };

        debug!("Fetching task {} from {} {}", task_id, self.client, endpoint);
        let raw = fetcher.fetch_task(&endpoint, task_id).await?;
        if raw.is_empty() {
            return Err(WebhookError::EmptyBody.into());
        }

        let body = self.decode_body(&raw, false)?;
        self.accept(request, body)
    }

    fn check_source(&self, request: &InboundRequest) -> Result<()> {
        if self.config.ip_whitelist.is_empty() {
            return Ok(());
        }
        match request.source_addr {
            Some(addr) if self.config.ip_whitelist.contains(&addr) => Ok(()),
            Some(addr) => Err(WebhookError::ForbiddenSource(addr.to_string()).into()),
            None => Err(WebhookError::ForbiddenSource("unknown".to_string()).into()),
        }
    }

    fn decode_body(&self, body: &[u8], gzip_header: bool) -> Result<Vec<u8>> {
        if gzip_header || is_compressed(body) {
            decompress(body).map_err(|e| WebhookError::Decompression(e.to_string()).into())
        } else {
            Ok(body.to_vec())
        }
    }

    /// Shared tail of both delivery paths
    fn accept(&self, request: &InboundRequest, body: Vec<u8>) -> Result<WebhookOutcome> {
        let task = parse_task(&body, self.config.success_code)?;
        let params = task_params(&task.data);
        let endpoint = self.resolve_endpoint(request, &task)?;

        let tag = resolve_tag([request.query_param("tag"), task.tag()]);
        let tag_supplied = tag.is_some();
        let method = self.config.result_method.to_uppercase();
        let cache_key = match tag {
            Some(tag) => tag,
            None => self.cache.generate_cache_key(
                &self.client,
                &endpoint,
                &params,
                &method,
                &self.version,
            ),
        };

        if let Some(existing) = self.cache.find_entry(&self.client, &cache_key)? {
            if let Some(other) = existing.attributes.as_deref().filter(|a| *a != task.id) {
                warn!(
                    "Cache key {} for {} held task {}; overwriting with task {}",
                    cache_key, self.client, other, task.id
                );
            }
        }

        let result = self.envelope(&endpoint, &task, body);
        self.cache.store_response(
            &self.client,
            &cache_key,
            &params,
            &result,
            &endpoint,
            Some(&task.id),
        )?;

        info!(
            "Stored task {} for {} {} under {}",
            task.id, self.client, endpoint, cache_key
        );
        Ok(WebhookOutcome {
            task_id: task.id,
            endpoint,
            cache_key,
            tag_supplied,
        })
    }

    /// Query hint, then the task's recorded path, then the endpoint stored
    /// when the task was created.
    fn resolve_endpoint(&self, request: &InboundRequest, task: &TaskResult) -> Result<String> {
        if let Some(hint) = request.query_param("endpoint") {
            return Ok(hint.trim_matches('/').to_string());
        }
        if let Some(endpoint) = task
            .path
            .as_deref()
            .and_then(|path| endpoint_from_path(path, &self.version, &task.id))
        {
            return Ok(endpoint);
        }
        self.cache
            .find_endpoint_for_task(&self.client, &task.id)?
            .ok_or_else(|| WebhookError::UnresolvableEndpoint(task.id.clone()).into())
    }

    fn envelope(&self, endpoint: &str, task: &TaskResult, body: Vec<u8>) -> ApiResult {
        let base = self.base_url.trim_end_matches('/');
        let full_url = if self.version.is_empty() {
            format!("{}/{}/{}", base, endpoint, task.id)
        } else {
            format!("{}/{}/{}/{}", base, self.version, endpoint, task.id)
        };

        ApiResult {
            method: self.config.result_method.to_uppercase(),
            base_url: self.base_url.clone(),
            full_url,
            request_headers: BTreeMap::new(),
            request_body: None,
            attributes: Some(task.id.clone()),
            cost: task.cost,
            response_status_code: 200,
            response_size: body.len(),
            response_time: 0.0,
            response: RawResponse {
                status: 200,
                headers: BTreeMap::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]),
                body,
            },
            is_cached: false,
        }
    }

    fn log_rejection(&self, kind: &str, request: &InboundRequest, err: &crate::error::Error) {
        error!(
            "Webhook {} for {} rejected ({:?}): {} [method={} client={} source={}]",
            kind,
            self.client,
            err.kind(),
            err,
            request.method,
            request.client_identity(),
            request
                .source_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}
