//! Request and result envelope types

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::cache::CacheEntry;

/// One outbound call, before any cache or quota decision
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Endpoint path relative to `base_url/version`
    pub endpoint: String,
    pub method: Method,
    /// Parameter bag; query string for GET, JSON body otherwise
    pub params: Value,
    /// Quota units this call costs
    pub amount: u32,
    /// Free-form correlation data stored with the entry
    pub attributes: Option<String>,
    /// Consult and fill the cache (default true)
    pub use_cache: bool,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            params: Value::Object(Map::new()),
            amount: 1,
            attributes: None,
            use_cache: true,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_amount(mut self, amount: u32) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = Some(attributes.into());
        self
    }

    /// Always hit the network and never store the response
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Raw HTTP response as received (or as replayed from the cache)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Uniform result of every call, live or cached
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    pub method: String,
    pub base_url: String,
    pub full_url: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: Option<String>,
    pub attributes: Option<String>,
    pub cost: Option<f64>,
    pub response: RawResponse,
    pub response_status_code: u16,
    pub response_size: usize,
    /// Seconds
    pub response_time: f64,
    pub is_cached: bool,
}

impl ApiResult {
    /// Rebuild a result envelope from a stored entry
    pub fn from_entry(entry: &CacheEntry) -> Self {
        let body = entry.response_body.clone().unwrap_or_default();
        let status = entry.response_status_code.unwrap_or_default();

        Self {
            method: entry.method.clone(),
            base_url: entry.base_url.clone().unwrap_or_default(),
            full_url: entry.full_url.clone().unwrap_or_default(),
            request_headers: parse_headers(entry.request_headers.as_deref()),
            request_body: entry.request_body.clone(),
            attributes: entry.attributes.clone(),
            cost: entry.cost,
            response: RawResponse {
                status,
                headers: parse_headers(entry.response_headers.as_deref()),
                body: body.clone(),
            },
            response_status_code: status,
            response_size: entry
                .response_size
                .map(|s| s as usize)
                .unwrap_or(body.len()),
            response_time: entry.response_time.unwrap_or_default(),
            is_cached: entry.is_cached,
        }
    }

    /// Parse the response body as JSON
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.response.body)
    }

    /// Response body as text (lossy)
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.response.body).into_owned()
    }

    /// JSON view for output; the body is embedded as JSON when it parses
    pub fn to_json(&self) -> Value {
        let body = self.json().unwrap_or_else(|_| Value::String(self.body_text()));
        serde_json::json!({
            "method": self.method,
            "base_url": self.base_url,
            "full_url": self.full_url,
            "request_headers": self.request_headers,
            "request_body": self.request_body,
            "attributes": self.attributes,
            "cost": self.cost,
            "response_status_code": self.response_status_code,
            "response_headers": self.response.headers,
            "response_size": self.response_size,
            "response_time": self.response_time,
            "is_cached": self.is_cached,
            "response": body,
        })
    }
}

fn parse_headers(raw: Option<&str>) -> BTreeMap<String, String> {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or_default()
}
