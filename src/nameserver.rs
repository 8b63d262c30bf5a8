//! Authoritative nameserver endpoints and per-lookup selection
//!
//! The pool is fixed at startup and never mutated. Selection is delegated to a
//! [`NameserverSelector`] strategy; the default draws uniformly at random on
//! every call. There is no health tracking: a failing nameserver is simply
//! drawn again with the same probability on a later lookup.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::error::ConfigError;

/// A `host:port` endpoint of an authoritative nameserver
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nameserver {
    pub host: String,
    pub port: u16,
}

impl Nameserver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for Nameserver {
    type Err = ConfigError;

    /// Parses `host:port`, with IPv6 literals written as `[addr]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidNameserver(s.to_string());
        let s = s.trim();

        let (host, port) = match s.strip_prefix('[') {
            Some(rest) => {
                let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
                (host, tail.strip_prefix(':').ok_or_else(invalid)?)
            }
            None => s.rsplit_once(':').ok_or_else(invalid)?,
        };

        if host.is_empty() || (host.contains(':') && !s.starts_with('[')) {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Nameserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Strategy choosing which nameserver answers the next lookup
pub trait NameserverSelector: Send + Sync + fmt::Debug {
    /// Returns an index in `0..len`; `len` is never zero
    fn select(&self, len: usize) -> usize;
}

/// Uniform random draw per call
#[derive(Debug, Default)]
pub struct RandomSelector;

impl NameserverSelector for RandomSelector {
    fn select(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Cycles through the nameservers in configuration order
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl NameserverSelector for RoundRobinSelector {
    fn select(&self, len: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// The configured, non-empty set of nameservers
#[derive(Debug)]
pub struct NameserverPool {
    nameservers: Vec<Nameserver>,
    selector: Box<dyn NameserverSelector>,
}

impl NameserverPool {
    /// Creates a pool with the given selection strategy
    ///
    /// # Errors
    /// Returns [`ConfigError::NoNameservers`] when `nameservers` is empty.
    pub fn new(
        nameservers: Vec<Nameserver>,
        selector: Box<dyn NameserverSelector>,
    ) -> Result<Self, ConfigError> {
        if nameservers.is_empty() {
            return Err(ConfigError::NoNameservers);
        }
        Ok(Self {
            nameservers,
            selector,
        })
    }

    /// Creates a pool drawing uniformly at random
    pub fn random(nameservers: Vec<Nameserver>) -> Result<Self, ConfigError> {
        Self::new(nameservers, Box::new(RandomSelector))
    }

    /// Picks the nameserver for one lookup
    pub fn select(&self) -> &Nameserver {
        let len = self.nameservers.len();
        // Guard against a selector returning an out-of-range index.
        let index = self.selector.select(len) % len;
        &self.nameservers[index]
    }

    pub fn nameservers(&self) -> &[Nameserver] {
        &self.nameservers
    }
}
