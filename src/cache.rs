//! Cache-aside storage for resolved hostnames
//!
//! A [`CacheStore`] is the process-wide handle on the backing key-value
//! service. For each lookup a [`CachePool`] checks out a connection and wraps
//! it in a [`ResolutionCache`]; dropping that value returns the connection,
//! whichever way the lookup ends.
//!
//! Writes use set-if-absent semantics: the first answer written for a
//! hostname stays until its TTL runs out, later writes are silent no-ops.
//! There is no way to force a refresh before expiry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::ResolvedAddress;
use crate::error::StoreError;

/// Process-wide handle on a cache backend
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Borrows a connection for the duration of one lookup
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, StoreError>;
}

/// A borrowed connection to the cache backend
#[async_trait]
pub trait CacheConnection: Send {
    /// `GET key`; a missing key is `Ok(None)`, not an error
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    /// `SET key value NX EX ttl_secs`; returns whether this call wrote the entry
    async fn set_nx_ex(&mut self, key: &str, value: &str, ttl_secs: u32) -> Result<bool, StoreError>;
}

/// Hands out per-lookup [`ResolutionCache`]s with every round trip bounded
#[derive(Clone)]
pub struct CachePool {
    store: Arc<dyn CacheStore>,
    op_timeout: Duration,
}

impl CachePool {
    pub fn new(store: Arc<dyn CacheStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    /// Checks out a connection for one lookup
    ///
    /// # Errors
    /// [`StoreError::Timeout`] if connecting takes longer than the operation
    /// timeout, or whatever the backend reports.
    pub async fn checkout(&self) -> Result<ResolutionCache, StoreError> {
        let conn = bounded(self.op_timeout, self.store.connect()).await?;
        Ok(ResolutionCache {
            conn,
            op_timeout: self.op_timeout,
        })
    }
}

/// Hostname to address cache, valid for the duration of one lookup
pub struct ResolutionCache {
    conn: Box<dyn CacheConnection>,
    op_timeout: Duration,
}

impl ResolutionCache {
    /// Looks up the cached address for `host`
    pub async fn get(&mut self, host: &str) -> Result<Option<ResolvedAddress>, StoreError> {
        let value = bounded(self.op_timeout, self.conn.get(host)).await?;
        Ok(value.as_deref().map(ResolvedAddress::from_cached))
    }

    /// Stores `host -> address` for `ttl` seconds unless an unexpired entry exists
    ///
    /// Returns `Ok(true)` when this call created the entry and `Ok(false)`
    /// when it was a no-op. A TTL of zero is never written.
    pub async fn set(&mut self, host: &str, address: &ResolvedAddress, ttl: u32) -> Result<bool, StoreError> {
        if ttl == 0 {
            debug!("Not caching {} with zero TTL", host);
            return Ok(false);
        }
        let value = address.to_string();
        bounded(self.op_timeout, self.conn.set_nx_ex(host, &value, ttl)).await
    }
}

async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    timeout(limit, op)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
