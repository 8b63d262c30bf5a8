//! Immutable process configuration
//!
//! Built once from the command line at startup and shared by reference
//! afterwards. Nothing in the crate mutates it.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::cli::{Cli, Selection};
use crate::error::ConfigError;
use crate::nameserver::Nameserver;

/// Where resolved hostnames are cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process map, lost on restart
    Memory,
    /// Redis at the given URL
    Redis(String),
}

impl CacheBackend {
    /// Parses `memory`, a `redis://`/`rediss://` URL, or a bare `host:port`
    pub fn parse(endpoint: &str) -> Result<Self, ConfigError> {
        let endpoint = endpoint.trim();
        let invalid = |reason: &str| ConfigError::InvalidCacheEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        if endpoint.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }
        if endpoint.is_empty() {
            return Err(invalid("empty endpoint"));
        }
        if endpoint.starts_with("redis://") || endpoint.starts_with("rediss://") {
            return Ok(Self::Redis(endpoint.to_string()));
        }
        if endpoint.contains("://") {
            return Err(invalid("unsupported scheme"));
        }

        // Bare `host:port`, with `:port` meaning localhost.
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
        let host = if host.is_empty() { "127.0.0.1" } else { host };
        Ok(Self::Redis(format!("redis://{}:{}", host, port)))
    }
}

/// Process-wide settings consumed by the lookup path and the proxy
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub use_cache: bool,
    pub cache_backend: CacheBackend,
    pub nameservers: Vec<Nameserver>,
    pub selection: Selection,
    pub dns_timeout: Duration,
    pub store_timeout: Duration,
    pub upstream_timeout: Duration,
}

impl Config {
    /// Validates the parsed command line into a configuration
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for an empty or malformed nameserver list,
    /// an unparseable listen address or cache endpoint, or a zero timeout.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let listen_ip: IpAddr = cli
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(cli.listen_addr.clone()))?;

        let nameservers = cli
            .nameservers
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::parse::<Nameserver>)
            .collect::<Result<Vec<_>, _>>()?;
        if nameservers.is_empty() {
            return Err(ConfigError::NoNameservers);
        }

        Ok(Self {
            listen: SocketAddr::new(listen_ip, cli.listen_port),
            use_cache: cli.use_cache(),
            cache_backend: CacheBackend::parse(&cli.cache_endpoint)?,
            nameservers,
            selection: cli.selection,
            dns_timeout: non_zero_millis(cli.dns_timeout_ms, "dns timeout")?,
            store_timeout: non_zero_millis(cli.store_timeout_ms, "store timeout")?,
            upstream_timeout: non_zero_millis(cli.upstream_timeout_ms, "upstream timeout")?,
        })
    }
}

fn non_zero_millis(ms: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::ZeroTimeout(name));
    }
    Ok(Duration::from_millis(ms))
}
