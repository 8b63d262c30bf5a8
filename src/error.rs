//! Error types for host resolution, the cache store and the proxy layer
//!
//! Resolution failures ([`LookupError`]) are terminal for a request, while
//! store failures ([`StoreError`]) are always absorbed by the lookup path and
//! only ever logged.

use std::io;
use std::time::Duration;

use thiserror::Error;
use trust_dns_resolver::proto::error::ProtoError;

/// Failure to turn a hostname into a backend address
#[derive(Debug, Error)]
pub enum LookupError {
    /// The hostname is not a DNS-valid name
    #[error("invalid hostname {0:?}")]
    InvalidHostname(String),

    /// The DNS exchange with the chosen nameserver did not complete
    #[error("DNS query for {host} via {nameserver} failed: {source}")]
    QueryFailed {
        host: String,
        nameserver: String,
        #[source]
        source: TransportError,
    },

    /// The nameserver replied without an address or alias in answer position 0
    #[error("no usable answer for {host} from {nameserver}")]
    NoUsableAnswer { host: String, nameserver: String },
}

/// Failure of a single DNS exchange on the wire
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed DNS message: {0}")]
    Codec(#[from] ProtoError),

    #[error("nameserver {0} has no usable address")]
    NoAddress(String),

    #[error("reply id {got} does not match query id {expected}")]
    IdMismatch { expected: u16, got: u16 },
}

/// Failure of the cache backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("cache store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one nameserver is required")]
    NoNameservers,

    #[error("invalid nameserver endpoint {0:?}, expected host:port")]
    InvalidNameserver(String),

    #[error("invalid listen address {0:?}")]
    InvalidListenAddr(String),

    #[error("invalid cache endpoint {endpoint:?}: {reason}")]
    InvalidCacheEndpoint { endpoint: String, reason: String },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Failure while proxying one inbound request
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request has no usable Host: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("request to {authority} failed: {source}")]
    Upstream {
        authority: String,
        #[source]
        source: reqwest::Error,
    },
}
