//! Outbound API mediation
//!
//! A [`RequestClient`] runs every call through the same skeleton: cache
//! lookup, quota check, HTTP, cacheability, store. What differs between
//! providers is captured by the small [`ApiProvider`] capability trait.

use reqwest::StatusCode;
use serde_json::Value;

#[cfg(test)]
pub mod mock;
pub mod models;
pub mod providers;
pub mod rate_limit;
pub mod request;

#[cfg(test)]
pub use mock::MockTaskFetcher;
pub use models::{ApiRequest, ApiResult, RawResponse};
pub use providers::{KeyedProvider, TaskBatchProvider, provider_for};
pub use rate_limit::{
    MemoryRateStore, ProviderThrottle, RateLimitService, RateLimitStore, SqliteRateStore,
};
pub use request::{RequestClient, TaskSubmission};

/// Provider-specific behavior plugged into [`RequestClient`].
pub trait ApiProvider: Send + Sync {
    /// Headers carrying credentials
    fn auth_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Query parameters carrying credentials
    fn auth_params(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Whether a response with parsed JSON `body` should be stored.
    fn is_cacheable(&self, status: StatusCode, _body: &Value) -> bool {
        status.is_success()
    }

    /// JSON body sent for non-GET requests
    fn request_body(&self, params: &Value) -> Value {
        params.clone()
    }

    /// Metered cost reported in a response body
    fn cost(&self, _body: &Value) -> Option<f64> {
        None
    }
}

impl<P: ApiProvider + ?Sized> ApiProvider for Box<P> {
    fn auth_headers(&self) -> Vec<(String, String)> {
        (**self).auth_headers()
    }

    fn auth_params(&self) -> Vec<(String, String)> {
        (**self).auth_params()
    }

    fn is_cacheable(&self, status: StatusCode, body: &Value) -> bool {
        (**self).is_cacheable(status, body)
    }

    fn request_body(&self, params: &Value) -> Value {
        (**self).request_body(params)
    }

    fn cost(&self, body: &Value) -> Option<f64> {
        (**self).cost(body)
    }
}
