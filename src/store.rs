//! Cache backends: Redis for deployments, an in-process map for single nodes and tests
//!
//! Both honour the same contract: `GET` misses are not errors and
//! `SET NX EX` never replaces an unexpired entry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheConnection, CacheStore};
use crate::error::StoreError;

/// Redis-backed store
///
/// All lookups share one multiplexed [`ConnectionManager`], created on the
/// first checkout. If Redis is down at that point the next checkout tries
/// again; once established the manager reconnects on its own.
pub struct RedisStore {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Creates a store for a `redis://` URL without connecting yet
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the URL cannot be parsed.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            manager: OnceCell::new(),
        })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, StoreError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                debug!("Connecting to Redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(Box::new(RedisConnection {
            conn: manager.clone(),
        }))
    }
}

struct RedisConnection {
    conn: ConnectionManager,
}

#[async_trait]
impl CacheConnection for RedisConnection {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn set_nx_ex(&mut self, key: &str, value: &str, ttl_secs: u32) -> Result<bool, StoreError> {
        // Redis answers OK when the key was written and nil when NX refused it.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// How often reads and writes sweep the whole map for expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// In-process store with Redis `SET NX EX` semantics
///
/// Expiry is measured on tokio's clock, so paused-time tests can move past a
/// TTL without sleeping. An expired entry is dropped when its key is touched,
/// and the first read or write after each [`SWEEP_INTERVAL`] drops every
/// expired entry, so keys that are never asked for again do not pile up.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
    next_sweep: Arc<Mutex<Instant>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_sweep: Arc::new(Mutex::new(Instant::now() + SWEEP_INTERVAL)),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Swept {} expired cache entries", removed);
        }
        removed
    }

    /// Runs [`purge_expired`](Self::purge_expired) once the sweep interval has passed
    ///
    /// Must not be called while holding a guard into `entries`.
    fn sweep_if_due(&self, now: Instant) {
        // Another caller holding the lock is already deciding; skip.
        let Ok(mut next) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + SWEEP_INTERVAL;
        drop(next);
        self.purge_expired();
    }

    /// Time left before the entry for `key` expires, if it is live
    pub fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Number of entries held, expired ones included until touched or swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.sweep_if_due(now);
        let live = self.entries.get(key).and_then(|entry| {
            (entry.expires_at > now).then(|| entry.value.clone())
        });
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        live
    }

    fn insert_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        self.sweep_if_due(now);
        let fresh = MemoryEntry {
            value: value.to_string(),
            expires_at: now + ttl,
        };
        // The shard lock is held for the whole check-and-insert.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().expires_at <= now => {
                occupied.insert(fresh);
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl CacheConnection for MemoryStore {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_live(key))
    }

    async fn set_nx_ex(&mut self, key: &str, value: &str, ttl_secs: u32) -> Result<bool, StoreError> {
        Ok(self.insert_if_absent(key, value, Duration::from_secs(u64::from(ttl_secs))))
    }
}
