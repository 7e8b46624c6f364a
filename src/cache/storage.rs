//! SQLite-based response storage
//!
//! One table per client. Each request/response pair is a single row written
//! by a single upsert, so readers never observe metadata without its body.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::compression;
use crate::error::CacheError;

/// Schema version stored in `user_version`
const SCHEMA_VERSION: i32 = 1;

/// How long a writer waits on another process's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database file name inside the cache directory
pub const DB_FILE: &str = "cache.db";

type Result<T> = std::result::Result<T, CacheError>;

/// One stored request/response pair.
///
/// `response_body` is always plain here; compression happens at the
/// storage boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub client: String,
    pub version: String,
    pub endpoint: String,
    pub base_url: Option<String>,
    pub full_url: Option<String>,
    pub method: String,
    pub request_params: Option<String>,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<Vec<u8>>,
    pub response_status_code: Option<u16>,
    pub response_size: Option<i64>,
    /// Seconds
    pub response_time: Option<f64>,
    pub cost: Option<f64>,
    pub attributes: Option<String>,
    pub is_cached: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Owned by downstream processors; never written here
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_status: Option<String>,
}

impl CacheEntry {
    /// Empty entry for `key`, to be filled in by the caller
    pub fn new(key: &str, client: &str, endpoint: &str, method: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            client: client.to_string(),
            version: String::new(),
            endpoint: endpoint.to_string(),
            base_url: None,
            full_url: None,
            method: method.to_ascii_uppercase(),
            request_params: None,
            request_headers: None,
            request_body: None,
            response_headers: None,
            response_body: None,
            response_status_code: None,
            response_size: None,
            response_time: None,
            cost: None,
            attributes: None,
            is_cached: false,
            created_at: now,
            updated_at: now,
            processed_at: None,
            processed_status: None,
        }
    }

    /// A placeholder written when an async task was created but no result
    /// has arrived yet.
    pub fn is_pending(&self) -> bool {
        self.response_body.is_none()
    }
}

/// Row as stored, body still in its at-rest form
struct StoredRow {
    entry: CacheEntry,
    raw_body: Option<Vec<u8>>,
}

/// SQLite-backed response storage
pub struct CacheStorage {
    conn: Connection,
    db_path: PathBuf,
    compressed_clients: HashMap<String, bool>,
    legacy_plain_reads: bool,
    /// Response tables known to exist
    tables: HashSet<String>,
}

impl CacheStorage {
    /// Open or create storage at the default XDG cache location
    pub fn open() -> Result<Self> {
        let cache_dir = Self::cache_dir()?;
        Self::open_at(&cache_dir)
    }

    /// Get the cache directory path (~/.cache/tollgate on Linux)
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(CacheError::NoHome)?;
        Ok(cache_base.join("tollgate"))
    }

    /// Open storage in a specific directory
    pub fn open_at(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = cache_dir.join(DB_FILE);
        let conn = open_connection(&db_path)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version == 0 {
            log::info!("Initializing response cache at {}", db_path.display());
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        } else if version != SCHEMA_VERSION {
            // Stored responses are an audit record; never rebuild them away
            return Err(CacheError::SchemaMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        // Task ids of pending placeholders; one post may return several
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending_tasks (
                client TEXT NOT NULL,
                task_id TEXT NOT NULL,
                key TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (client, task_id)
            );
            "#,
        )?;

        Ok(Self {
            conn,
            db_path,
            compressed_clients: HashMap::new(),
            legacy_plain_reads: false,
            tables: HashSet::new(),
        })
    }

    /// Path of the database file, shared with the rate limit store
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Record whether bodies for `client` are stored compressed
    pub fn set_compression(&mut self, client: &str, compressed: bool) {
        self.compressed_clients.insert(client.to_string(), compressed);
    }

    /// Accept plain bodies found in compressed tables (rows written before
    /// compression was enabled). Off by default.
    pub fn allow_legacy_plain_reads(&mut self, allow: bool) {
        self.legacy_plain_reads = allow;
    }

    pub fn is_compressed(&self, client: &str) -> bool {
        self.compressed_clients.get(client).copied().unwrap_or(false)
    }

    /// Storage table for `client`, which differs for compressed clients so
    /// that direct readers know how to decode bodies.
    pub fn table_name_for(&self, client: &str) -> Result<String> {
        let base = sanitize_client(client)?;
        if self.is_compressed(client) {
            Ok(format!("{}_responses_compressed", base))
        } else {
            Ok(format!("{}_responses", base))
        }
    }

    /// Look up an entry by key. A client without a table has no entries.
    pub fn find(&self, client: &str, key: &str) -> Result<Option<CacheEntry>> {
        let Some(table) = self.existing_table(client)? else {
            return Ok(None);
        };

        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM \"{}\" WHERE key = ?1", COLUMNS, table),
                [key],
                read_row,
            )
            .optional()?;

        row.map(|r| self.decode(r)).transpose()
    }

    /// Insert or replace the entry for `entry.key`.
    ///
    /// Safe to repeat and to race: the last writer wins, except that a write
    /// without a body never clears an existing one. `created_at` and the
    /// processing columns of an existing row are left alone.
    pub fn store(&mut self, entry: &CacheEntry) -> Result<()> {
        let table = self.ensure_table(&entry.client)?;

        let body = match &entry.response_body {
            Some(body) if self.is_compressed(&entry.client) => Some(
                compression::compress(body).map_err(|e| CacheError::InvalidEntry(e.to_string()))?,
            ),
            other => other.clone(),
        };

        let sql = format!(
            "INSERT INTO \"{t}\" ({COLUMNS_INSERT})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
             ON CONFLICT(key) DO UPDATE SET
                client = excluded.client,
                version = excluded.version,
                endpoint = excluded.endpoint,
                base_url = COALESCE(excluded.base_url, base_url),
                full_url = COALESCE(excluded.full_url, full_url),
                method = excluded.method,
                request_params = COALESCE(excluded.request_params, request_params),
                request_headers = COALESCE(excluded.request_headers, request_headers),
                request_body = COALESCE(excluded.request_body, request_body),
                response_headers = COALESCE(excluded.response_headers, response_headers),
                response_body = COALESCE(excluded.response_body, response_body),
                response_status_code = COALESCE(excluded.response_status_code, response_status_code),
                response_size = COALESCE(excluded.response_size, response_size),
                response_time = COALESCE(excluded.response_time, response_time),
                cost = COALESCE(excluded.cost, cost),
                attributes = COALESCE(excluded.attributes, attributes),
                is_cached = excluded.is_cached,
                updated_at = excluded.updated_at",
            t = table
        );

        let now = Utc::now().timestamp();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            &sql,
            params![
                entry.key,
                entry.client,
                entry.version,
                entry.endpoint,
                entry.base_url,
                entry.full_url,
                entry.method,
                entry.request_params,
                entry.request_headers,
                entry.request_body,
                entry.response_headers,
                body,
                entry.response_status_code,
                entry.response_size,
                entry.response_time,
                entry.cost,
                entry.attributes,
                entry.is_cached,
                now,
                now,
            ],
        )?;
        tx.commit()?;

        log::debug!("Stored {} in {}", entry.key, table);
        Ok(())
    }

    /// Write a body-less placeholder unless the key already exists, and
    /// record `entry.attributes` as a task id pointing at it.
    /// Returns whether a placeholder row was inserted.
    pub fn insert_pending(&mut self, entry: &CacheEntry) -> Result<bool> {
        let table = self.ensure_table(&entry.client)?;
        let now = Utc::now().timestamp();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO \"{}\"
                 (key, client, version, endpoint, method, request_params, attributes, is_cached, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
                table
            ),
            params![
                entry.key,
                entry.client,
                entry.version,
                entry.endpoint,
                entry.method,
                entry.request_params,
                entry.attributes,
                now,
            ],
        )?;
        if let Some(task_id) = &entry.attributes {
            tx.execute(
                "INSERT OR REPLACE INTO pending_tasks (client, task_id, key, endpoint, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry.client, task_id, entry.key, entry.endpoint, now],
            )?;
        }
        tx.commit()?;
        Ok(inserted > 0)
    }

    /// Endpoint of the most recent entry carrying `attributes`, falling back
    /// to task ids recorded for pending placeholders
    pub fn find_endpoint_by_attributes(
        &self,
        client: &str,
        attributes: &str,
    ) -> Result<Option<String>> {
        if let Some(table) = self.existing_table(client)? {
            let endpoint = self
                .conn
                .query_row(
                    &format!(
                        "SELECT endpoint FROM \"{}\" WHERE attributes = ?1
                         ORDER BY updated_at DESC LIMIT 1",
                        table
                    ),
                    [attributes],
                    |r| r.get(0),
                )
                .optional()?;
            if endpoint.is_some() {
                return Ok(endpoint);
            }
        }

        let endpoint = self
            .conn
            .query_row(
                "SELECT endpoint FROM pending_tasks WHERE client = ?1 AND task_id = ?2",
                [client, attributes],
                |r| r.get(0),
            )
            .optional()?;
        Ok(endpoint)
    }

    /// Remove every entry of one client
    pub fn clear(&self, client: &str) -> Result<ClearStats> {
        self.conn
            .execute("DELETE FROM pending_tasks WHERE client = ?1", [client])?;
        let Some(table) = self.existing_table(client)? else {
            return Ok(ClearStats { entries_removed: 0 });
        };
        let removed = self.conn.execute(&format!("DELETE FROM \"{}\"", table), [])?;
        log::info!("Cleared {} entries from {}", removed, table);
        Ok(ClearStats {
            entries_removed: removed,
        })
    }

    /// Remove every entry of every client
    pub fn clear_all(&self) -> Result<ClearStats> {
        self.conn.execute("DELETE FROM pending_tasks", [])?;
        let mut removed = 0;
        for table in self.response_tables()? {
            removed += self.conn.execute(&format!("DELETE FROM \"{}\"", table), [])?;
        }
        log::info!("Cleared {} entries from all response tables", removed);
        Ok(ClearStats {
            entries_removed: removed,
        })
    }

    /// Per-table statistics
    pub fn stats(&self) -> Result<Vec<TableStats>> {
        let mut stats = Vec::new();
        for table in self.response_tables()? {
            let (entries, pending, size, oldest, newest): (
                i64,
                i64,
                i64,
                Option<i64>,
                Option<i64>,
            ) = self.conn.query_row(
                &format!(
                    "SELECT COUNT(*),
                            COALESCE(SUM(response_body IS NULL), 0),
                            COALESCE(SUM(LENGTH(response_body)), 0),
                            MIN(created_at),
                            MAX(created_at)
                     FROM \"{}\"",
                    table
                ),
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )?;

            stats.push(TableStats {
                table,
                entries: entries as usize,
                pending_entries: pending as usize,
                stored_bytes: size as usize,
                oldest_entry: oldest,
                newest_entry: newest,
            });
        }
        Ok(stats)
    }

    fn response_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND (name LIKE '%\\_responses' ESCAPE '\\'
                                       OR name LIKE '%\\_responses\\_compressed' ESCAPE '\\')
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Table for `client` if it has been created, by this or another process.
    /// Never writes.
    fn existing_table(&self, client: &str) -> Result<Option<String>> {
        let table = self.table_name_for(client)?;
        if self.tables.contains(&table) {
            return Ok(Some(table));
        }
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [&table],
            |r| r.get(0),
        )?;
        Ok(exists.then_some(table))
    }

    fn ensure_table(&mut self, client: &str) -> Result<String> {
        let table = self.table_name_for(client)?;
        if self.tables.contains(&table) {
            return Ok(table);
        }
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{t}" (
                key TEXT PRIMARY KEY NOT NULL,
                client TEXT NOT NULL,
                version TEXT NOT NULL DEFAULT '',
                endpoint TEXT NOT NULL,
                base_url TEXT,
                full_url TEXT,
                method TEXT NOT NULL,
                request_params TEXT,
                request_headers TEXT,
                request_body TEXT,
                response_headers TEXT,
                response_body BLOB,
                response_status_code INTEGER,
                response_size INTEGER,
                response_time REAL,
                cost REAL,
                attributes TEXT,
                is_cached INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                processed_at INTEGER,
                processed_status TEXT
            );

            CREATE INDEX IF NOT EXISTS "idx_{t}_attributes" ON "{t}"(attributes);
            CREATE INDEX IF NOT EXISTS "idx_{t}_endpoint" ON "{t}"(endpoint);
            "#,
            t = table
        ))?;
        self.tables.insert(table.clone());
        Ok(table)
    }

    fn decode(&self, row: StoredRow) -> Result<CacheEntry> {
        let StoredRow { mut entry, raw_body } = row;

        entry.response_body = match raw_body {
            Some(raw) if self.is_compressed(&entry.client) => {
                let plain = if self.legacy_plain_reads {
                    compression::decompress_or_plain(&raw)
                } else {
                    compression::decompress(&raw)
                };
                Some(plain.map_err(|source| CacheError::CorruptBody {
                    key: entry.key.clone(),
                    source,
                })?)
            }
            other => other,
        };
        Ok(entry)
    }
}

/// Open a connection suitable for sharing the database between processes
pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
    Ok(conn)
}

/// Lowercase, `[a-z0-9_]` only, no leading/trailing underscores
fn sanitize_client(client: &str) -> Result<String> {
    let cleaned: String = client
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();

    if cleaned.is_empty() {
        return Err(CacheError::InvalidClientName(client.to_string()));
    }
    Ok(cleaned)
}

const COLUMNS_INSERT: &str = "key, client, version, endpoint, base_url, full_url, method, \
     request_params, request_headers, request_body, response_headers, response_body, \
     response_status_code, response_size, response_time, cost, attributes, is_cached, \
     created_at, updated_at";

const COLUMNS: &str = "key, client, version, endpoint, base_url, full_url, method, \
     request_params, request_headers, request_body, response_headers, response_body, \
     response_status_code, response_size, response_time, cost, attributes, is_cached, \
     created_at, updated_at, processed_at, processed_status";

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    let created: i64 = row.get(18)?;
    let updated: i64 = row.get(19)?;
    let processed: Option<i64> = row.get(20)?;

    Ok(StoredRow {
        raw_body: row.get(11)?,
        entry: CacheEntry {
            key: row.get(0)?,
            client: row.get(1)?,
            version: row.get(2)?,
            endpoint: row.get(3)?,
            base_url: row.get(4)?,
            full_url: row.get(5)?,
            method: row.get(6)?,
            request_params: row.get(7)?,
            request_headers: row.get(8)?,
            request_body: row.get(9)?,
            response_headers: row.get(10)?,
            response_body: None,
            response_status_code: row.get(12)?,
            response_size: row.get(13)?,
            response_time: row.get(14)?,
            cost: row.get(15)?,
            attributes: row.get(16)?,
            is_cached: row.get(17)?,
            created_at: timestamp(created),
            updated_at: timestamp(updated),
            processed_at: processed.map(timestamp),
            processed_status: row.get(21)?,
        },
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Statistics about a clear operation
#[derive(Debug, Serialize)]
pub struct ClearStats {
    pub entries_removed: usize,
}

/// Statistics for one client table
#[derive(Debug, Serialize)]
pub struct TableStats {
    pub table: String,
    pub entries: usize,
    pub pending_entries: usize,
    /// Bytes at rest (after compression)
    pub stored_bytes: usize,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}
