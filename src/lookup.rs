//! Cache-aside host lookup
//!
//! The [`LookupOrchestrator`] is the single entry point the proxy uses to turn
//! a virtual hostname into a backend address. With caching enabled it:
//!
//! 1. Checks the resolution cache, treating any store failure as a miss
//! 2. Returns a cached address without touching DNS
//! 3. Otherwise resolves through one nameserver; a DNS failure fails the lookup
//! 4. Writes the fresh answer back with set-if-absent semantics, logging but
//!    never propagating a failed write
//!
//! Concurrent lookups of the same uncached hostname may each query DNS; the
//! store's set-if-absent write keeps exactly one of their answers.
//!
//! CNAME answers are returned as the alias target. They are not chased to a
//! final address here.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CachePool, CacheStore, ResolutionCache};
use crate::cli::Selection;
use crate::config::{CacheBackend, Config};
use crate::dns::{ResolvedAddress, Resolver, UdpTransport};
use crate::error::{ConfigError, LookupError, StoreError};
use crate::nameserver::{NameserverPool, NameserverSelector, RandomSelector, RoundRobinSelector};
use crate::store::{MemoryStore, RedisStore};
use crate::validation::normalize_hostname;

/// Coordinates the resolution cache and the resolver for one hostname at a time
///
/// Holds only immutable state, so one instance is shared by every request.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use nsproxy::cache::CachePool;
/// use nsproxy::dns::{Resolver, UdpTransport};
/// use nsproxy::lookup::LookupOrchestrator;
/// use nsproxy::nameserver::NameserverPool;
/// use nsproxy::store::MemoryStore;
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = NameserverPool::random(vec!["ns1.example:53".parse()?])?;
/// let resolver = Resolver::new(pool, Arc::new(UdpTransport::new(Duration::from_secs(2))));
/// let cache = CachePool::new(Arc::new(MemoryStore::new()), Duration::from_millis(500));
/// let orchestrator = LookupOrchestrator::new(resolver, Some(cache));
///
/// let address = orchestrator.lookup("app.example").await?;
/// println!("app.example -> {}", address);
/// # Ok(())
/// # }
/// ```
pub struct LookupOrchestrator {
    resolver: Resolver,
    cache: Option<CachePool>,
}

impl LookupOrchestrator {
    /// Creates an orchestrator; `cache: None` disables caching entirely
    pub fn new(resolver: Resolver, cache: Option<CachePool>) -> Self {
        Self { resolver, cache }
    }

    /// Wires the UDP resolver, selection strategy and cache backend from `config`
    ///
    /// No connection to the cache backend is made here; an unreachable store
    /// only shows up as logged misses once requests arrive.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the nameserver list is empty or the Redis
    /// URL is rejected by the client.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let selector: Box<dyn NameserverSelector> = match config.selection {
            Selection::Random => Box::new(RandomSelector),
            Selection::RoundRobin => Box::new(RoundRobinSelector::default()),
        };
        let pool = NameserverPool::new(config.nameservers.clone(), selector)?;
        let resolver = Resolver::new(pool, Arc::new(UdpTransport::new(config.dns_timeout)));

        let cache = if config.use_cache {
            let store: Arc<dyn CacheStore> = match &config.cache_backend {
                CacheBackend::Memory => Arc::new(MemoryStore::new()),
                CacheBackend::Redis(url) => {
                    let store = RedisStore::open(url).map_err(|e| ConfigError::InvalidCacheEndpoint {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    })?;
                    Arc::new(store)
                }
            };
            Some(CachePool::new(store, config.store_timeout))
        } else {
            None
        };

        Ok(Self::new(resolver, cache))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Resolves `hostname` to a backend address
    ///
    /// # Arguments
    /// * `hostname` - Virtual hostname as received, any case, optional trailing dot
    ///
    /// # Returns
    /// * `Result<ResolvedAddress, LookupError>` - The cached or freshly resolved
    ///   address; store problems never produce an error
    pub async fn lookup(&self, hostname: &str) -> Result<ResolvedAddress, LookupError> {
        let host = normalize_hostname(hostname)?;

        let Some(pool) = &self.cache else {
            let resolution = self.resolver.resolve(&host).await?;
            info!("DNS hit for Host <{}>: <{}>", host, resolution.address);
            return Ok(resolution.address);
        };

        // Held until this function returns, on every path.
        let mut cache = match pool.checkout().await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!("Cache checkout failed for {}: {}", host, e);
                None
            }
        };

        if let Some(cache) = cache.as_mut() {
            match cache.get(&host).await {
                Ok(Some(address)) => {
                    info!("Cache hit for Host <{}>: <{}>", host, address);
                    return Ok(address);
                }
                Ok(None) => debug!("Cache miss for {}", host),
                Err(e) => warn!("Cache read failed for {}: {}", host, e),
            }
        }

        let resolution = self.resolver.resolve(&host).await?;

        if let Some(cache) = cache.as_mut() {
            store_resolution(cache, &host, &resolution.address, resolution.ttl).await;
        }

        info!("DNS hit for Host <{}>: <{}>", host, resolution.address);
        Ok(resolution.address)
    }
}

async fn store_resolution(cache: &mut ResolutionCache, host: &str, address: &ResolvedAddress, ttl: u32) {
    match cache.set(host, address, ttl).await {
        Ok(true) => debug!("Cached {} -> {} for {}s", host, address, ttl),
        Ok(false) if ttl == 0 => debug!("Not caching {}, answer has zero TTL", host),
        Ok(false) => debug!("Cache already holds {}, keeping first answer", host),
        Err(StoreError::Timeout(limit)) => warn!("Cache write for {} timed out after {:?}", host, limit),
        Err(e) => warn!("Cache write failed for {}: {}", host, e),
    }
}
