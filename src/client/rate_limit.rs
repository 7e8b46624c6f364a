//! Per-client quotas and reactive provider throttling
//!
//! Quotas are a fixed number of attempts per decay window. The window opens
//! on the first hit and its counter resets once the window has elapsed.
//! Counters live in a [`RateLimitStore`]; the SQLite store lets several
//! processes share them.
//!
//! Separately, a provider that answers 429 gets its calls paced by a
//! governor limiter derived from the client's quota.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::cache::storage::open_connection;
use crate::config::Config;
use crate::error::{CacheError, Error, Result};

/// Counter state of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub attempts: u32,
    /// Unix millis at which the window closes
    pub reset_at_ms: i64,
}

/// Storage for window counters. Time is passed in so stores stay clock-free.
pub trait RateLimitStore: Send + Sync {
    /// Open window for `key` at `now_ms`, if any
    fn window(&self, key: &str, now_ms: i64) -> Result<Option<WindowState>>;

    /// Add `amount` to the window for `key`, opening a new one of length
    /// `window` if none is open
    fn hit(&self, key: &str, amount: u32, window: Duration, now_ms: i64) -> Result<WindowState>;

    /// Check the window for `key` against `limit` and, if it has room, add
    /// `amount` to it. Check and increment happen under one lock.
    fn try_hit(
        &self,
        key: &str,
        amount: u32,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<Admission>;

    /// Drop the counter for `key`
    fn reset(&self, key: &str) -> Result<()>;
}

fn advance(current: Option<WindowState>, amount: u32, window: Duration, now_ms: i64) -> WindowState {
    match current {
        Some(state) if state.reset_at_ms > now_ms => WindowState {
            attempts: state.attempts.saturating_add(amount),
            reset_at_ms: state.reset_at_ms,
        },
        _ => WindowState {
            attempts: amount,
            reset_at_ms: now_ms
                .saturating_add(i64::try_from(window.as_millis()).unwrap_or(i64::MAX)),
        },
    }
}

/// Outcome of [`RateLimitStore::try_hit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted; carries the updated window
    Granted(WindowState),
    /// Window full; carries the unchanged window
    Denied(WindowState),
}

fn admit(
    current: Option<WindowState>,
    amount: u32,
    limit: u32,
    window: Duration,
    now_ms: i64,
) -> Admission {
    match current {
        Some(state) if state.reset_at_ms > now_ms && state.attempts >= limit => {
            Admission::Denied(state)
        }
        _ => Admission::Granted(advance(current, amount, window, now_ms)),
    }
}

/// Process-local counters
#[derive(Default)]
pub struct MemoryRateStore {
    windows: Mutex<HashMap<String, WindowState>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateStore {
    fn window(&self, key: &str, now_ms: i64) -> Result<Option<WindowState>> {
        let windows = self.windows.lock().map_err(|_| CacheError::Lock)?;
        Ok(windows
            .get(key)
            .copied()
            .filter(|state| state.reset_at_ms > now_ms))
    }

    fn hit(&self, key: &str, amount: u32, window: Duration, now_ms: i64) -> Result<WindowState> {
        let mut windows = self.windows.lock().map_err(|_| CacheError::Lock)?;
        let next = advance(windows.get(key).copied(), amount, window, now_ms);
        windows.insert(key.to_string(), next);
        Ok(next)
    }

    fn try_hit(
        &self,
        key: &str,
        amount: u32,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<Admission> {
        let mut windows = self.windows.lock().map_err(|_| CacheError::Lock)?;
        let admission = admit(windows.get(key).copied(), amount, limit, window, now_ms);
        if let Admission::Granted(next) = admission {
            windows.insert(key.to_string(), next);
        }
        Ok(admission)
    }

    fn reset(&self, key: &str) -> Result<()> {
        let mut windows = self.windows.lock().map_err(|_| CacheError::Lock)?;
        windows.remove(key);
        Ok(())
    }
}

/// Counters in the cache database, shared across processes
pub struct SqliteRateStore {
    conn: Mutex<Connection>,
}

impl SqliteRateStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = open_connection(db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limits (
                key TEXT PRIMARY KEY NOT NULL,
                attempts INTEGER NOT NULL,
                reset_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RateLimitStore for SqliteRateStore {
    fn window(&self, key: &str, now_ms: i64) -> Result<Option<WindowState>> {
        let conn = self.conn.lock().map_err(|_| CacheError::Lock)?;
        let state = conn
            .query_row(
                "SELECT attempts, reset_at FROM rate_limits WHERE key = ?1 AND reset_at > ?2",
                params![key, now_ms],
                |r| {
                    Ok(WindowState {
                        attempts: r.get(0)?,
                        reset_at_ms: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn hit(&self, key: &str, amount: u32, window: Duration, now_ms: i64) -> Result<WindowState> {
        let mut conn = self.conn.lock().map_err(|_| CacheError::Lock)?;
        // Immediate: read-modify-write must not interleave with other processes
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let next = advance(read_window(&tx, key)?, amount, window, now_ms);
        write_window(&tx, key, next)?;
        tx.commit()?;
        Ok(next)
    }

    fn try_hit(
        &self,
        key: &str,
        amount: u32,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<Admission> {
        let mut conn = self.conn.lock().map_err(|_| CacheError::Lock)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let admission = admit(read_window(&tx, key)?, amount, limit, window, now_ms);
        if let Admission::Granted(next) = admission {
            write_window(&tx, key, next)?;
        }
        tx.commit()?;
        Ok(admission)
    }

    fn reset(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| CacheError::Lock)?;
        conn.execute("DELETE FROM rate_limits WHERE key = ?1", [key])?;
        Ok(())
    }
}

fn read_window(conn: &Connection, key: &str) -> Result<Option<WindowState>> {
    let state = conn
        .query_row(
            "SELECT attempts, reset_at FROM rate_limits WHERE key = ?1",
            [key],
            |r| {
                Ok(WindowState {
                    attempts: r.get(0)?,
                    reset_at_ms: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(state)
}

fn write_window(conn: &Connection, key: &str, state: WindowState) -> Result<()> {
    conn.execute(
        "INSERT INTO rate_limits (key, attempts, reset_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET attempts = excluded.attempts, reset_at = excluded.reset_at",
        params![key, state.attempts, state.reset_at_ms],
    )?;
    Ok(())
}

/// Attempts allowed per window
#[derive(Debug, Clone, Copy)]
struct Limit {
    attempts: u32,
    window: Duration,
}

/// Quota check and consumption per client identity.
///
/// Clients without a configured limit are never limited.
pub struct RateLimitService {
    store: Box<dyn RateLimitStore>,
    limits: HashMap<String, Limit>,
}

impl RateLimitService {
    /// Service with limits taken from every configured client
    pub fn new(store: impl RateLimitStore + 'static, config: &Config) -> Self {
        let limits = config
            .clients
            .iter()
            .map(|(name, client)| {
                (
                    name.clone(),
                    Limit {
                        attempts: client.rate_limit.attempts,
                        window: client.rate_limit.window(),
                    },
                )
            })
            .collect();

        Self {
            store: Box::new(store),
            limits,
        }
    }

    /// Process-local counters
    pub fn in_memory(config: &Config) -> Self {
        Self::new(MemoryRateStore::new(), config)
    }

    /// Counters shared through the cache database
    pub fn shared(db_path: &Path, config: &Config) -> Result<Self> {
        Ok(Self::new(SqliteRateStore::open(db_path)?, config))
    }

    /// Override or add the limit for one client
    pub fn with_limit(mut self, client: &str, attempts: u32, window: Duration) -> Self {
        self.limits
            .insert(client.to_string(), Limit { attempts, window });
        self
    }

    /// Whether `client` may make another attempt now
    pub fn allow(&self, client: &str) -> Result<bool> {
        self.allow_at(client, now_ms())
    }

    /// Count `amount` attempts against `client`; returns the window total
    pub fn consume(&self, client: &str, amount: u32) -> Result<u32> {
        self.consume_at(client, amount, now_ms())
    }

    /// Attempts made in the open window
    pub fn attempts(&self, client: &str) -> Result<u32> {
        self.attempts_at(client, now_ms())
    }

    /// Attempts left in the open window (`None` when unlimited)
    pub fn remaining(&self, client: &str) -> Result<Option<u32>> {
        let now = now_ms();
        match self.limits.get(client) {
            Some(limit) => Ok(Some(
                limit.attempts.saturating_sub(self.attempts_at(client, now)?),
            )),
            None => Ok(None),
        }
    }

    /// Time until the open window closes
    pub fn available_in(&self, client: &str) -> Result<Duration> {
        self.available_in_at(client, now_ms())
    }

    /// Forget the counter for `client`
    pub fn reset(&self, client: &str) -> Result<()> {
        self.store.reset(&store_key(client))
    }

    /// Quota check for a call path. Errors with `RateLimited` when denied.
    pub fn check(&self, client: &str) -> Result<()> {
        if self.allow(client)? {
            Ok(())
        } else {
            Err(Error::RateLimited {
                client: client.to_string(),
                retry_after: self.available_in(client)?,
            })
        }
    }

    /// Admit and count one call of weight `amount` in a single step.
    /// Errors with `RateLimited` when the window is already full.
    pub fn try_consume(&self, client: &str, amount: u32) -> Result<()> {
        self.try_consume_at(client, amount, now_ms())
    }

    fn try_consume_at(&self, client: &str, amount: u32, now: i64) -> Result<()> {
        let Some(limit) = self.limits.get(client) else {
            return Ok(());
        };
        match self
            .store
            .try_hit(&store_key(client), amount, limit.attempts, limit.window, now)?
        {
            Admission::Granted(state) => {
                debug!(
                    "Quota {}: {}/{} attempts in window",
                    client, state.attempts, limit.attempts
                );
                Ok(())
            }
            Admission::Denied(state) => Err(Error::RateLimited {
                client: client.to_string(),
                retry_after: Duration::from_millis((state.reset_at_ms - now).max(0) as u64),
            }),
        }
    }

    fn allow_at(&self, client: &str, now: i64) -> Result<bool> {
        let Some(limit) = self.limits.get(client) else {
            return Ok(true);
        };
        Ok(self.attempts_at(client, now)? < limit.attempts)
    }

    fn consume_at(&self, client: &str, amount: u32, now: i64) -> Result<u32> {
        let Some(limit) = self.limits.get(client) else {
            return Ok(0);
        };
        let state = self.store.hit(&store_key(client), amount, limit.window, now)?;
        debug!(
            "Quota {}: {}/{} attempts in window",
            client, state.attempts, limit.attempts
        );
        Ok(state.attempts)
    }

    fn attempts_at(&self, client: &str, now: i64) -> Result<u32> {
        Ok(self
            .store
            .window(&store_key(client), now)?
            .map(|s| s.attempts)
            .unwrap_or(0))
    }

    fn available_in_at(&self, client: &str, now: i64) -> Result<Duration> {
        Ok(self
            .store
            .window(&store_key(client), now)?
            .map(|s| Duration::from_millis((s.reset_at_ms - now).max(0) as u64))
            .unwrap_or(Duration::ZERO))
    }
}

fn store_key(client: &str) -> String {
    format!("quota:{}", client)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Pacing for one client, dormant until the provider answers 429.
pub struct ClientThrottle {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    active: AtomicBool,
    client: String,
}

impl ClientThrottle {
    /// Spread `attempts` evenly over `window`
    pub fn new(client: &str, attempts: u32, window: Duration) -> Self {
        let attempts = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / attempts.get())
            .unwrap_or_else(|| Quota::per_second(attempts));

        Self {
            limiter: RateLimiter::direct(quota),
            active: AtomicBool::new(false),
            client: client.to_string(),
        }
    }

    /// Activate pacing.
    pub fn activate(&self) {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if !was_active {
            debug!("Provider throttling activated for {}", self.client);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for permission if pacing is active.
    pub async fn wait_if_active(&self) {
        if self.is_active() {
            debug!("Waiting for provider throttle {}", self.client);
            self.limiter.until_ready().await;
        }
    }
}

/// Throttles for all configured clients
pub struct ProviderThrottle {
    throttles: HashMap<String, ClientThrottle>,
}

impl ProviderThrottle {
    pub fn new(config: &Config) -> Self {
        let throttles = config
            .clients
            .iter()
            .map(|(name, client)| {
                (
                    name.clone(),
                    ClientThrottle::new(name, client.rate_limit.attempts, client.rate_limit.window()),
                )
            })
            .collect();
        Self { throttles }
    }

    /// Wait for pacing permission for `client` (if active).
    pub async fn wait_for(&self, client: &str) {
        if let Some(throttle) = self.throttles.get(client) {
            throttle.wait_if_active().await;
        }
    }

    /// Activate pacing for `client` (called on 429).
    pub fn activate(&self, client: &str) {
        if let Some(throttle) = self.throttles.get(client) {
            throttle.activate();
        }
    }

    pub fn is_active(&self, client: &str) -> bool {
        self.throttles
            .get(client)
            .map(ClientThrottle::is_active)
            .unwrap_or(false)
    }
}
