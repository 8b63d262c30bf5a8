//! Command-line interface for the nsproxy host-resolving reverse proxy
//!
//! This module defines the flags accepted at process start using the clap
//! framework. Parsed flags are turned into an immutable
//! [`Config`](crate::config::Config) once, in `main`, and nothing reads the
//! command line after that.
//!
//! # Flags
//!
//! - Listen address and port of the proxy
//! - Cache toggle and cache backend endpoint
//! - Authoritative nameservers and how one is picked per lookup
//! - Timeouts for the DNS exchange, each cache round trip and backend requests

use clap::{Parser, ValueEnum};

/// Main command-line interface structure for nsproxy
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use nsproxy::cli::Cli;
///
/// let cli = Cli::try_parse_from([
///     "nsproxy",
///     "--nameservers", "ns1.example:53,ns2.example:5353",
///     "--no-cache",
/// ]).unwrap();
///
/// assert_eq!(cli.nameservers.len(), 2);
/// assert!(!cli.use_cache());
/// ```
#[derive(Debug, Parser)]
#[command(
    name = "nsproxy",
    about = "HTTP reverse proxy resolving virtual hosts against authoritative nameservers",
    version
)]
pub struct Cli {
    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub listen_addr: String,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    pub listen_port: u16,

    /// Enable the resolution cache (the default)
    #[arg(long = "use-cache", overrides_with = "no_cache")]
    pub force_cache: bool,

    /// Disable the resolution cache; every request queries a nameserver
    #[arg(long = "no-cache", overrides_with = "force_cache")]
    pub no_cache: bool,

    /// Cache backend: a redis:// URL, a bare host:port for Redis,
    /// or `memory` for an in-process cache
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    pub cache_endpoint: String,

    /// Authoritative nameservers as a comma separated host:port list
    #[arg(short = 'n', long, value_delimiter = ',', default_value = "ns1.jimdo.com:53")]
    pub nameservers: Vec<String>,

    /// How a nameserver is picked for each lookup
    #[arg(long, value_enum, default_value_t = Selection::Random)]
    pub selection: Selection,

    /// Timeout in milliseconds for one DNS exchange
    #[arg(long, default_value = "2000")]
    pub dns_timeout_ms: u64,

    /// Timeout in milliseconds for each cache store round trip
    #[arg(long, default_value = "500")]
    pub store_timeout_ms: u64,

    /// Timeout in milliseconds for the proxied backend request
    #[arg(long, default_value = "30000")]
    pub upstream_timeout_ms: u64,
}

impl Cli {
    /// Whether lookups go through the cache; the last of `--use-cache` and
    /// `--no-cache` on the command line wins
    pub fn use_cache(&self) -> bool {
        !self.no_cache
    }
}

/// Nameserver selection strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Selection {
    /// Uniformly random per lookup
    Random,
    /// In configuration order
    RoundRobin,
}
