//! Request client: the fixed cache / quota / HTTP / store skeleton

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, Method, StatusCode, Url};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::models::{ApiRequest, ApiResult, RawResponse};
use super::providers::provider_for;
use super::rate_limit::{ProviderThrottle, RateLimitService};
use super::ApiProvider;
use crate::cache::CacheManager;
use crate::config::{ClientConfig, Config};
use crate::error::{ApiError, ConfigError, Error, Result};
use crate::webhook::TaskFetcher;

/// Value shown in place of credentials in result envelopes
const REDACTED: &str = "[redacted]";

/// Outcome of posting an asynchronous task
#[derive(Debug, Clone)]
pub struct TaskSubmission {
    /// Key the task result will be filed under
    pub cache_key: String,
    /// Task ids returned by the provider
    pub task_ids: Vec<String>,
    pub result: ApiResult,
}

/// Mediated client for one configured API.
pub struct RequestClient<P: ApiProvider = Box<dyn ApiProvider>> {
    name: String,
    config: ClientConfig,
    provider: P,
    http: HttpClient,
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimitService>,
    throttle: Arc<ProviderThrottle>,
}

impl RequestClient {
    /// Client `name` from `config`, with its configured provider
    pub fn from_config(
        name: &str,
        config: &Config,
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimitService>,
        throttle: Arc<ProviderThrottle>,
    ) -> Result<Self> {
        let client = config.client(name)?.clone();
        let provider = provider_for(&client);
        Self::new(name, client, provider, cache, limiter, throttle)
    }
}

impl<P: ApiProvider> RequestClient<P> {
    pub fn new(
        name: &str,
        config: ClientConfig,
        provider: P,
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimitService>,
        throttle: Arc<ProviderThrottle>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            config,
            provider,
            http,
            cache,
            limiter,
            throttle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Key `request` would be cached under
    pub fn cache_key(&self, request: &ApiRequest) -> String {
        self.cache.generate_cache_key(
            &self.name,
            &request.endpoint,
            &request.params,
            request.method.as_str(),
            &self.config.version,
        )
    }

    /// Run one call through cache, quota, HTTP and store.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResult> {
        let use_cache = request.use_cache && self.config.cacheable;
        let key = self.cache_key(request);

        if use_cache {
            if let Some(entry) = self.cache.get_cached_response(&self.name, &key)? {
                debug!("Cache hit: {} {}", self.name, request.endpoint);
                return Ok(ApiResult::from_entry(&entry));
            }
        }

        // Paid up front: a call that times out still counts
        self.limiter.try_consume(&self.name, request.amount)?;
        self.throttle.wait_for(&self.name).await;

        let (result, parsed) = self.execute(request).await?;

        if use_cache {
            let status =
                StatusCode::from_u16(result.response_status_code).unwrap_or(StatusCode::OK);
            match parsed {
                Ok(body) if self.provider.is_cacheable(status, &body) => {
                    self.cache.store_response(
                        &self.name,
                        &key,
                        &request.params,
                        &result,
                        &request.endpoint,
                        request.attributes.as_deref(),
                    )?;
                }
                Ok(_) => warn!(
                    "Response not cacheable: {} {} (HTTP {})",
                    self.name, request.endpoint, status
                ),
                Err(e) => warn!(
                    "Malformed response from {} {}, not cached: {}",
                    self.name, request.endpoint, e
                ),
            }
        }

        Ok(result)
    }

    /// Post a task tagged with the key its result will be stored under and
    /// record a pending placeholder for every task id the provider returns.
    ///
    /// `result_endpoint` is the endpoint the finished task is fetched from.
    pub async fn create_task(
        &self,
        post_endpoint: &str,
        result_endpoint: &str,
        params: &Value,
    ) -> Result<TaskSubmission> {
        let method = self.config.webhook.result_method.to_uppercase();
        let key = self.cache.generate_cache_key(
            &self.name,
            result_endpoint,
            params,
            &method,
            &self.config.version,
        );

        let mut body = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "task parameters must be an object, got {}",
                    other
                ))
                .into());
            }
        };
        body.insert("tag".to_string(), Value::String(key.clone()));
        if let Some(url) = &self.config.webhook.postback_url {
            body.insert("postback_url".to_string(), Value::String(url.clone()));
        }
        if let Some(url) = &self.config.webhook.pingback_url {
            body.insert("pingback_url".to_string(), Value::String(url.clone()));
        }

        let request = ApiRequest::post(post_endpoint)
            .with_params(Value::Object(body))
            .no_cache();
        let result = self.send(&request).await?;

        let task_ids = result
            .json()
            .ok()
            .and_then(|body| body.get("tasks").and_then(Value::as_array).cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|task| task.get("id").and_then(Value::as_str).map(str::to_string))
            .collect::<Vec<_>>();

        if task_ids.is_empty() {
            warn!(
                "Task post to {} {} returned no task ids (HTTP {})",
                self.name, post_endpoint, result.response_status_code
            );
        }
        for id in &task_ids {
            self.cache
                .register_pending(&self.name, &key, result_endpoint, params, &method, id)?;
            debug!("Task {} pending under {}", id, key);
        }

        Ok(TaskSubmission {
            cache_key: key,
            task_ids,
            result,
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_matches('/');
        let version = self.config.version.trim_matches('/');
        if version.is_empty() {
            format!("{}/{}", base, endpoint)
        } else {
            format!("{}/{}/{}", base, version, endpoint)
        }
    }

    async fn execute(
        &self,
        request: &ApiRequest,
    ) -> Result<(ApiResult, serde_json::Result<Value>)> {
        let url = self.endpoint_url(&request.endpoint);
        let timeout = self.config.timeout();

        let query = if request.method == Method::GET {
            query_pairs(&request.params)
        } else {
            Vec::new()
        };
        let mut display_url =
            Url::parse(&url).map_err(|e| ConfigError::Invalid(format!("bad URL {}: {}", url, e)))?;
        if !query.is_empty() {
            display_url.query_pairs_mut().extend_pairs(&query);
        }

        let mut wire_query = query;
        wire_query.extend(self.provider.auth_params());

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .timeout(timeout)
            .query(&wire_query);

        let mut request_headers = BTreeMap::new();
        for (name, value) in self.provider.auth_headers() {
            builder = builder.header(name.as_str(), value);
            request_headers.insert(name, REDACTED.to_string());
        }

        let mut request_body = None;
        if request.method != Method::GET {
            let body = serde_json::to_string(&self.provider.request_body(&request.params))?;
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            request_headers.insert(CONTENT_TYPE.to_string(), "application/json".to_string());
            request_body = Some(body);
        }

        debug!("{} {}", request.method, display_url);
        let started = Instant::now();
        let transport = |e: reqwest::Error| -> Error {
            if e.is_timeout() {
                ApiError::Timeout(timeout).into()
            } else {
                ApiError::from(e).into()
            }
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect::<BTreeMap<_, _>>();
        let body = response.bytes().await.map_err(transport)?.to_vec();
        let elapsed = started.elapsed().as_secs_f64();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("{} answered 429; pacing further calls", self.name);
            self.throttle.activate(&self.name);
        }

        let parsed = serde_json::from_slice::<Value>(&body);
        let cost = parsed.as_ref().ok().and_then(|b| self.provider.cost(b));

        let result = ApiResult {
            method: request.method.as_str().to_string(),
            base_url: self.config.base_url.clone(),
            full_url: display_url.to_string(),
            request_headers,
            request_body,
            attributes: request.attributes.clone(),
            cost,
            response_status_code: status.as_u16(),
            response_size: body.len(),
            response_time: elapsed,
            response: RawResponse {
                status: status.as_u16(),
                headers,
                body,
            },
            is_cached: false,
        };

        Ok((result, parsed))
    }
}

#[async_trait]
impl<P: ApiProvider> TaskFetcher for RequestClient<P> {
    async fn fetch_task(&self, endpoint: &str, task_id: &str) -> Result<Vec<u8>> {
        let path = format!("{}/{}", endpoint.trim_end_matches('/'), task_id);
        let result = self.send(&ApiRequest::get(path).no_cache()).await?;

        if !(200..300).contains(&result.response_status_code) {
            return Err(ApiError::InvalidResponse(format!(
                "fetching task {} returned HTTP {}",
                task_id, result.response_status_code
            ))
            .into());
        }
        Ok(result.response.body)
    }
}

/// Flatten a parameter object into query pairs.
///
/// Arrays repeat their key; nested objects are sent as JSON text.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::providers::KeyedProvider;
    use crate::config::AuthStyle;
    use serde_json::json;
    use tempfile::TempDir;

    fn client(base_url: &str, version: &str) -> (RequestClient<KeyedProvider>, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        let mut demo = ClientConfig::new(base_url);
        demo.version = version.to_string();
        config.clients.insert("demo".to_string(), demo.clone());

        let cache = Arc::new(CacheManager::open_at(dir.path(), &config).unwrap());
        let limiter = Arc::new(RateLimitService::in_memory(&config));
        let throttle = Arc::new(ProviderThrottle::new(&config));
        let provider = KeyedProvider::new(AuthStyle::Bearer, Some("secret".to_string()));
        let client = RequestClient::new("demo", demo, provider, cache, limiter, throttle).unwrap();
        (client, dir)
    }

    #[test]
    fn test_endpoint_url() {
        let (with_version, _d1) = client("https://api.example.com/", "v3");
        assert_eq!(
            with_version.endpoint_url("/serp/task_post"),
            "https://api.example.com/v3/serp/task_post"
        );

        let (without_version, _d2) = client("https://api.example.com", "");
        assert_eq!(
            without_version.endpoint_url("search"),
            "https://api.example.com/search"
        );
    }

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(&json!({
            "q": "shoes",
            "page": 2,
            "exact": true,
            "skip": null,
            "tags": ["a", "b"]
        }));
        assert_eq!(
            pairs,
            vec![
                ("exact".to_string(), "true".to_string()),
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "shoes".to_string()),
                ("tags".to_string(), "a".to_string()),
                ("tags".to_string(), "b".to_string()),
            ]
        );
        assert!(query_pairs(&json!(null)).is_empty());
    }

    #[test]
    fn test_cache_key_uses_version_and_method() {
        let (v1, _d1) = client("https://api.example.com", "v1");
        let (v2, _d2) = client("https://api.example.com", "v2");
        let get = ApiRequest::get("search").with_params(json!({"q": "shoes"}));
        let post = ApiRequest::post("search").with_params(json!({"q": "shoes"}));

        assert_ne!(v1.cache_key(&get), v2.cache_key(&get));
        assert_ne!(v1.cache_key(&get), v1.cache_key(&post));
        assert_eq!(v1.cache_key(&get), v1.cache_key(&get.clone().with_amount(5)));
    }
}
