//! End-to-end request mediation against a mock provider

use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use tollgate::cache::CacheManager;
use tollgate::client::{ApiRequest, ProviderThrottle, RateLimitService, RequestClient};
use tollgate::config::{AuthStyle, ClientConfig, Config, ProviderKind};
use tollgate::error::{ApiError, Error, ErrorKind};

struct Harness {
    client: RequestClient,
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimitService>,
    _dir: TempDir,
}

fn harness(client_config: ClientConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.clients.insert("demo".to_string(), client_config);

    let cache = Arc::new(CacheManager::open_at(dir.path(), &config).unwrap());
    let limiter = Arc::new(RateLimitService::shared(cache.db_path(), &config).unwrap());
    let throttle = Arc::new(ProviderThrottle::new(&config));
    let client =
        RequestClient::from_config("demo", &config, cache.clone(), limiter.clone(), throttle)
            .unwrap();

    Harness {
        client,
        cache,
        limiter,
        _dir: dir,
    }
}

fn demo_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(base_url);
    config.version = "v1".to_string();
    config.compress = true;
    config
}

#[tokio::test]
async fn reordered_params_hit_the_cache_without_quota() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "shoes".into()),
            Matcher::UrlEncoded("page".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items": ["red", "blue"]}"#)
        .expect(1)
        .create_async()
        .await;

    let h = harness(demo_config(&server.url()));

    let first = h
        .client
        .send(&ApiRequest::get("search").with_params(json!({"q": "shoes", "page": 1})))
        .await
        .unwrap();
    assert!(!first.is_cached);
    assert_eq!(first.response_status_code, 200);
    assert!(first.full_url.contains("/v1/search?"));
    assert!(first.full_url.contains("q=shoes"));
    assert!(first.full_url.contains("page=1"));
    assert_eq!(h.limiter.attempts("demo").unwrap(), 1);

    let second = h
        .client
        .send(&ApiRequest::get("search").with_params(json!({"page": 1, "q": "shoes"})))
        .await
        .unwrap();
    assert!(second.is_cached);
    assert_eq!(second.response.body, first.response.body);
    assert_eq!(second.json().unwrap()["items"][1], "blue");
    assert_eq!(h.limiter.attempts("demo").unwrap(), 1);

    upstream.assert_async().await;
}

#[tokio::test]
async fn all_tasks_failed_is_not_stored() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("POST", "/v1/serp/live")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status_code": 20000, "tasks_count": 3, "tasks_error": 3, "tasks": []}"#)
        .expect(2)
        .create_async()
        .await;

    let mut config = demo_config(&server.url());
    config.provider = ProviderKind::TaskBatch;
    let h = harness(config);
    let request = ApiRequest::post("serp/live").with_params(json!({"keyword": "shoes"}));

    for _ in 0..2 {
        let result = h.client.send(&request).await.unwrap();
        assert!(!result.is_cached);
        assert_eq!(result.response_status_code, 200);
    }

    let key = h.client.cache_key(&request);
    assert!(h.cache.find_entry("demo", &key).unwrap().is_none());
    upstream.assert_async().await;
}

#[tokio::test]
async fn task_batch_body_is_wrapped_and_cost_recorded() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("POST", "/v1/serp/live")
        .match_query(Matcher::Any)
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .match_body(Matcher::Json(json!([{"keyword": "shoes"}])))
        .with_status(200)
        .with_body(r#"{"status_code": 20000, "cost": 0.003, "tasks_count": 1, "tasks_error": 0}"#)
        .create_async()
        .await;

    let mut config = demo_config(&server.url());
    config.provider = ProviderKind::TaskBatch;
    config.auth = AuthStyle::Basic {
        login: "user".to_string(),
        password: "pass".to_string(),
    };
    let h = harness(config);

    let request = ApiRequest::post("serp/live").with_params(json!({"keyword": "shoes"}));
    let result = h.client.send(&request).await.unwrap();
    assert_eq!(result.cost, Some(0.003));
    assert_eq!(result.request_body.as_deref(), Some(r#"[{"keyword":"shoes"}]"#));
    assert_eq!(
        result.request_headers.get("Authorization").map(String::as_str),
        Some("[redacted]")
    );

    let entry = h
        .cache
        .get_cached_response("demo", &h.client.cache_key(&request))
        .unwrap()
        .unwrap();
    assert_eq!(entry.cost, Some(0.003));
    upstream.assert_async().await;
}

#[tokio::test]
async fn exhausted_quota_is_rate_limited_not_transport() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let mut config = demo_config(&server.url());
    config.rate_limit.attempts = 1;
    let h = harness(config);

    h.client
        .send(&ApiRequest::get("search").with_params(json!({"q": "a"})))
        .await
        .unwrap();
    let err = h
        .client
        .send(&ApiRequest::get("search").with_params(json!({"q": "b"})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert!(!err.is_retryable());

    // Cached responses are still served once the quota is gone
    let replay = h
        .client
        .send(&ApiRequest::get("search").with_params(json!({"q": "a"})))
        .await
        .unwrap();
    assert!(replay.is_cached);
    upstream.assert_async().await;
}

#[tokio::test]
async fn transport_failure_still_consumes_quota() {
    // Nothing listens on port 1
    let h = harness(demo_config("http://127.0.0.1:1"));
    let request = ApiRequest::get("search").with_amount(3);

    let err = h.client.send(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
    assert_eq!(h.limiter.attempts("demo").unwrap(), 3);
    assert!(
        h.cache
            .find_entry("demo", &h.client.cache_key(&request))
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn timed_out_call_is_transport_and_still_paid() {
    // Accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = demo_config(&format!("http://{}", addr));
    config.timeout_secs = 1;
    let h = harness(config);
    let request = ApiRequest::get("search")
        .with_params(json!({"q": "slow"}))
        .with_amount(2);

    let err = h.client.send(&request).await.unwrap_err();
    assert!(matches!(err, Error::Api(ApiError::Timeout(_))));
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
    assert_eq!(h.limiter.attempts("demo").unwrap(), 2);
    assert!(
        h.cache
            .find_entry("demo", &h.client.cache_key(&request))
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn malformed_json_is_returned_but_not_cached() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .expect(2)
        .create_async()
        .await;

    let h = harness(demo_config(&server.url()));
    let request = ApiRequest::get("search");

    for _ in 0..2 {
        let result = h.client.send(&request).await.unwrap();
        assert!(!result.is_cached);
        assert_eq!(result.body_text(), "<html>maintenance</html>");
    }
    upstream.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_not_cached() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body(r#"{"error": "busy"}"#)
        .expect(2)
        .create_async()
        .await;

    let h = harness(demo_config(&server.url()));
    for _ in 0..2 {
        let result = h.client.send(&ApiRequest::get("search")).await.unwrap();
        assert_eq!(result.response_status_code, 503);
    }
    upstream.assert_async().await;
}

#[tokio::test]
async fn query_auth_stays_out_of_recorded_url() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "shoes".into()),
            Matcher::UrlEncoded("api_key".into(), "k-secret".into()),
        ]))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut config = demo_config(&server.url());
    config.auth = AuthStyle::Query {
        param: "api_key".to_string(),
    };
    config.api_key = Some("k-secret".to_string());
    let h = harness(config);

    let result = h
        .client
        .send(&ApiRequest::get("search").with_params(json!({"q": "shoes"})))
        .await
        .unwrap();
    assert!(!result.full_url.contains("k-secret"));
    upstream.assert_async().await;
}

#[tokio::test]
async fn no_cache_request_bypasses_lookup_and_store() {
    let mut server = Server::new_async().await;
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let h = harness(demo_config(&server.url()));
    let cached = ApiRequest::get("search");
    h.client.send(&cached).await.unwrap();

    // A stored entry exists, but no_cache still goes to the network
    let fresh = h.client.send(&cached.clone().no_cache()).await.unwrap();
    assert!(!fresh.is_cached);
    assert_eq!(h.limiter.attempts("demo").unwrap(), 2);
    upstream.assert_async().await;
}
