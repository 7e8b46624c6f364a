//! Cache manager shared by request clients and webhook receivers
//!
//! Wraps [`CacheStorage`] behind a mutex and owns the per-client settings
//! (version, compression) needed to derive keys and table names.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::key::cache_key;
use super::storage::{CacheEntry, CacheStorage, ClearStats, TableStats};
use crate::client::ApiResult;
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Entry point for every cache read and write.
///
/// `store_response` is the same call whether the data came from a live
/// request or a webhook delivery.
pub struct CacheManager {
    storage: Mutex<CacheStorage>,
    versions: HashMap<String, String>,
    db_path: PathBuf,
}

impl CacheManager {
    /// Open the cache at `config.cache_dir`, or the default location
    pub fn open(config: &Config) -> Result<Self> {
        let storage = match &config.cache_dir {
            Some(dir) => CacheStorage::open_at(dir)?,
            None => CacheStorage::open()?,
        };
        Ok(Self::with_storage(storage, config))
    }

    /// Open the cache in `dir`, ignoring `config.cache_dir`
    pub fn open_at(dir: &Path, config: &Config) -> Result<Self> {
        Ok(Self::with_storage(CacheStorage::open_at(dir)?, config))
    }

    /// Wrap already-opened storage, applying per-client settings
    pub fn with_storage(mut storage: CacheStorage, config: &Config) -> Self {
        storage.allow_legacy_plain_reads(config.legacy_plain_reads);
        let mut versions = HashMap::new();
        for (name, client) in &config.clients {
            storage.set_compression(name, client.compress);
            versions.insert(name.clone(), client.version.clone());
        }
        let db_path = storage.db_path().to_path_buf();

        Self {
            storage: Mutex::new(storage),
            versions,
            db_path,
        }
    }

    /// Database file, for components that keep their own connection
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Configured protocol version of `client` (empty if unknown)
    pub fn version_of(&self, client: &str) -> &str {
        self.versions.get(client).map(String::as_str).unwrap_or("")
    }

    /// Derive the cache key for a request. Usable before any request or
    /// task exists.
    pub fn generate_cache_key(
        &self,
        client: &str,
        endpoint: &str,
        params: &Value,
        method: &str,
        version: &str,
    ) -> String {
        cache_key(client, endpoint, params, method, version)
    }

    /// Cached response for `key`, if a complete one is stored.
    ///
    /// Pure read: no quota, no network. Pending placeholders are not hits.
    pub fn get_cached_response(&self, client: &str, key: &str) -> Result<Option<CacheEntry>> {
        let found = self.lock()?.find(client, key)?;
        match found {
            Some(mut entry) if !entry.is_pending() => {
                entry.is_cached = true;
                Ok(Some(entry))
            }
            Some(_) => {
                log::debug!("Cache pending: {} {}", client, key);
                Ok(None)
            }
            None => {
                log::debug!("Cache miss: {} {}", client, key);
                Ok(None)
            }
        }
    }

    /// Raw lookup, placeholders included
    pub fn find_entry(&self, client: &str, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.lock()?.find(client, key)?)
    }

    /// Validate a result envelope and persist it under `key`.
    pub fn store_response(
        &self,
        client: &str,
        key: &str,
        params: &Value,
        result: &ApiResult,
        endpoint: &str,
        attributes: Option<&str>,
    ) -> Result<()> {
        if result.response_status_code == 0 {
            return Err(CacheError::InvalidEntry(format!("{}: missing status code", key)).into());
        }
        if result.method.is_empty() {
            return Err(CacheError::InvalidEntry(format!("{}: missing method", key)).into());
        }

        let mut entry = CacheEntry::new(key, client, endpoint.trim_matches('/'), &result.method);
        entry.version = self.version_of(client).to_string();
        entry.base_url = Some(result.base_url.clone());
        entry.full_url = Some(result.full_url.clone());
        entry.request_params = Some(serde_json::to_string(params)?);
        entry.request_headers = Some(serde_json::to_string(&result.request_headers)?);
        entry.request_body = result.request_body.clone();
        entry.response_headers = Some(serde_json::to_string(&result.response.headers)?);
        entry.response_body = Some(result.response.body.clone());
        entry.response_status_code = Some(result.response_status_code);
        entry.response_size = Some(result.response_size as i64);
        entry.response_time = Some(result.response_time);
        entry.cost = result.cost;
        entry.attributes = attributes
            .map(str::to_string)
            .or_else(|| result.attributes.clone());
        entry.is_cached = false;

        self.lock()?.store(&entry)?;
        log::debug!("Cache store: {} {} ({} bytes)", client, endpoint, result.response_size);
        Ok(())
    }

    /// Record that an async task was created for `key`, so its webhook can
    /// later be matched by task id. Never replaces a stored result.
    pub fn register_pending(
        &self,
        client: &str,
        key: &str,
        endpoint: &str,
        params: &Value,
        method: &str,
        task_id: &str,
    ) -> Result<bool> {
        let mut entry = CacheEntry::new(key, client, endpoint.trim_matches('/'), method);
        entry.version = self.version_of(client).to_string();
        entry.request_params = Some(serde_json::to_string(params)?);
        entry.attributes = Some(task_id.to_string());

        Ok(self.lock()?.insert_pending(&entry)?)
    }

    /// Endpoint previously recorded for `task_id`
    pub fn find_endpoint_for_task(&self, client: &str, task_id: &str) -> Result<Option<String>> {
        Ok(self.lock()?.find_endpoint_by_attributes(client, task_id)?)
    }

    /// Table holding `client` responses (compressed tables are named apart)
    pub fn get_table_name(&self, client: &str) -> Result<String> {
        Ok(self.lock()?.table_name_for(client)?)
    }

    /// Administrative clear of one client, or all of them
    pub fn clear(&self, client: Option<&str>) -> Result<ClearStats> {
        let storage = self.lock()?;
        let stats = match client {
            Some(c) => storage.clear(c)?,
            None => storage.clear_all()?,
        };
        Ok(stats)
    }

    pub fn stats(&self) -> Result<Vec<TableStats>> {
        Ok(self.lock()?.stats()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheStorage>> {
        self.storage.lock().map_err(|_| CacheError::Lock.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiResult, RawResponse};
    use crate::cache::storage::DB_FILE;
    use crate::config::ClientConfig;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn test_manager(compress: bool) -> (CacheManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        let mut client = ClientConfig::new("https://api.example.com");
        client.version = "v1".to_string();
        client.compress = compress;
        config.clients.insert("demo".to_string(), client);

        let manager = CacheManager::open_at(dir.path(), &config).unwrap();
        (manager, dir)
    }

    fn result(body: &[u8]) -> ApiResult {
        ApiResult {
            method: "GET".to_string(),
            base_url: "https://api.example.com".to_string(),
            full_url: "https://api.example.com/v1/search?q=shoes".to_string(),
            request_headers: BTreeMap::new(),
            request_body: None,
            attributes: None,
            cost: Some(0.0025),
            response: RawResponse {
                status: 200,
                headers: BTreeMap::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]),
                body: body.to_vec(),
            },
            response_status_code: 200,
            response_size: body.len(),
            response_time: 0.12,
            is_cached: false,
        }
    }

    #[test]
    fn test_legacy_plain_reads_follow_config() {
        let dir = TempDir::new().unwrap();
        {
            let mut storage = CacheStorage::open_at(dir.path()).unwrap();
            let mut plain = CacheEntry::new("old", "demo", "search", "GET");
            plain.response_body = Some(b"{\"legacy\":true}".to_vec());
            storage.store(&plain).unwrap();
        }
        // Rows written before the client switched compression on
        rusqlite::Connection::open(dir.path().join(DB_FILE))
            .unwrap()
            .execute(
                "CREATE TABLE demo_responses_compressed AS SELECT * FROM demo_responses",
                [],
            )
            .unwrap();

        let mut config = Config::default();
        let mut client = ClientConfig::new("https://api.example.com");
        client.compress = true;
        config.clients.insert("demo".to_string(), client);

        let strict = CacheManager::open_at(dir.path(), &config).unwrap();
        assert!(strict.get_cached_response("demo", "old").is_err());

        config.legacy_plain_reads = true;
        let lenient = CacheManager::open_at(dir.path(), &config).unwrap();
        let entry = lenient.get_cached_response("demo", "old").unwrap().unwrap();
        assert_eq!(entry.response_body.as_deref(), Some(&b"{\"legacy\":true}"[..]));
    }

    #[test]
    fn test_store_then_get_is_byte_identical() {
        for compress in [false, true] {
            let (manager, _dir) = test_manager(compress);
            let params = json!({"q": "shoes"});
            let key = manager.generate_cache_key("demo", "search", &params, "GET", "v1");
            let body = r#"{"items":[1,2,3],"note":"café"}"#.as_bytes();

            manager
                .store_response("demo", &key, &params, &result(body), "search", None)
                .unwrap();

            let entry = manager.get_cached_response("demo", &key).unwrap().unwrap();
            assert_eq!(entry.response_body.as_deref(), Some(body));
            assert!(entry.is_cached);
            assert_eq!(entry.version, "v1");
            assert_eq!(entry.cost, Some(0.0025));
            assert_eq!(entry.request_params.as_deref(), Some(r#"{"q":"shoes"}"#));
        }
    }

    #[test]
    fn test_table_name_follows_compression() {
        let (plain, _d1) = test_manager(false);
        let (packed, _d2) = test_manager(true);

        assert_eq!(plain.get_table_name("demo").unwrap(), "demo_responses");
        assert_eq!(
            packed.get_table_name("demo").unwrap(),
            "demo_responses_compressed"
        );
    }

    #[test]
    fn test_pending_is_not_a_hit() {
        let (manager, _dir) = test_manager(false);
        let params = json!({"keyword": "shoes"});

        assert!(
            manager
                .register_pending("demo", "k1", "serp/task_get/advanced", &params, "POST", "T1")
                .unwrap()
        );
        assert!(manager.get_cached_response("demo", "k1").unwrap().is_none());
        assert!(manager.find_entry("demo", "k1").unwrap().unwrap().is_pending());
        assert_eq!(
            manager.find_endpoint_for_task("demo", "T1").unwrap(),
            Some("serp/task_get/advanced".to_string())
        );

        manager
            .store_response("demo", "k1", &params, &result(b"{}"), "serp/task_get/advanced", Some("T1"))
            .unwrap();
        assert!(manager.get_cached_response("demo", "k1").unwrap().is_some());
    }

    #[test]
    fn test_store_rejects_incomplete_envelope() {
        let (manager, _dir) = test_manager(false);
        let mut bad = result(b"{}");
        bad.response_status_code = 0;

        let err = manager
            .store_response("demo", "k", &json!({}), &bad, "search", None)
            .unwrap_err();
        assert!(err.to_string().contains("missing status code"));
        assert!(manager.find_entry("demo", "k").unwrap().is_none());
    }

    #[test]
    fn test_attributes_argument_wins_over_envelope() {
        let (manager, _dir) = test_manager(false);
        let mut res = result(b"{}");
        res.attributes = Some("from-envelope".to_string());

        manager
            .store_response("demo", "a", &json!({}), &res, "search", Some("explicit"))
            .unwrap();
        manager
            .store_response("demo", "b", &json!({}), &res, "search", None)
            .unwrap();

        let a = manager.find_entry("demo", "a").unwrap().unwrap();
        let b = manager.find_entry("demo", "b").unwrap().unwrap();
        assert_eq!(a.attributes.as_deref(), Some("explicit"));
        assert_eq!(b.attributes.as_deref(), Some("from-envelope"));
    }

    #[test]
    fn test_clear_one_client() {
        let (manager, _dir) = test_manager(false);
        manager
            .store_response("demo", "a", &json!({}), &result(b"1"), "search", None)
            .unwrap();

        assert_eq!(manager.clear(Some("demo")).unwrap().entries_removed, 1);
        assert!(manager.get_cached_response("demo", "a").unwrap().is_none());
    }
}
