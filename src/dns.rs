//! Single-shot DNS resolution against a chosen authoritative nameserver
//!
//! The [`Resolver`] asks one nameserver (picked by the [`NameserverPool`]) for
//! the `A` record of a hostname and interprets only the first record of the
//! answer section:
//!
//! - an `A` record yields its IPv4 address
//! - a `CNAME` record yields the alias target, which is *not* resolved further
//! - anything else, or an empty answer section, is [`LookupError::NoUsableAnswer`]
//!
//! The wire exchange sits behind the [`DnsTransport`] trait so the resolution
//! policy can be exercised without a network.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;
use trust_dns_resolver::proto::op::{Message, MessageType, OpCode, Query};
use trust_dns_resolver::proto::rr::{Name, RData, RecordType};

use crate::error::{LookupError, TransportError};
use crate::nameserver::{Nameserver, NameserverPool};

/// Receive buffer for a single UDP reply
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// What a hostname resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAddress {
    /// Address taken from an `A` record
    Ipv4(Ipv4Addr),
    /// Target of a `CNAME` record, without the trailing root dot
    Alias(String),
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(addr) => write!(f, "{}", addr),
            Self::Alias(target) => f.write_str(target),
        }
    }
}

impl ResolvedAddress {
    /// Reads a value back from the cache: IPv4 literals become
    /// [`ResolvedAddress::Ipv4`], everything else is an alias
    pub fn from_cached(value: &str) -> Self {
        match value.parse::<Ipv4Addr>() {
            Ok(addr) => Self::Ipv4(addr),
            Err(_) => Self::Alias(value.to_string()),
        }
    }
}

/// A successful resolution with the TTL reported by the nameserver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub address: ResolvedAddress,
    pub ttl: u32,
}

/// Payload of one answer record, reduced to what the resolver interprets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerData {
    A(Ipv4Addr),
    Cname(String),
    Other(RecordType),
}

/// One record from the answer section of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub ttl: u32,
    pub data: AnswerData,
}

impl AnswerRecord {
    pub fn a(addr: Ipv4Addr, ttl: u32) -> Self {
        Self {
            ttl,
            data: AnswerData::A(addr),
        }
    }

    pub fn cname(target: impl Into<String>, ttl: u32) -> Self {
        Self {
            ttl,
            data: AnswerData::Cname(target.into()),
        }
    }
}

/// Sends a type-A query for a name to a nameserver and returns the answer section
#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn query_a(
        &self,
        nameserver: &Nameserver,
        host: &str,
    ) -> Result<Vec<AnswerRecord>, TransportError>;
}

/// Plain DNS over UDP, one socket per query
///
/// The whole exchange, including resolving the nameserver's own address, is
/// bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    timeout: Duration,
}

impl UdpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, nameserver: &Nameserver, query: &Message) -> Result<Message, TransportError> {
        let server_addr = lookup_host((nameserver.host.as_str(), nameserver.port))
            .await?
            .next()
            .ok_or_else(|| TransportError::NoAddress(nameserver.to_string()))?;

        let bind_addr = match server_addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        // A connected socket drops datagrams from any other source.
        socket.connect(server_addr).await?;
        socket.send(&query.to_vec()?).await?;

        let mut recv_buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        let len = socket.recv(&mut recv_buf).await?;
        let response = Message::from_vec(&recv_buf[..len])?;

        if response.id() != query.id() {
            return Err(TransportError::IdMismatch {
                expected: query.id(),
                got: response.id(),
            });
        }
        Ok(response)
    }
}

/// Builds a recursion-desired `A` query for `host.` with a random id
pub fn build_query(host: &str) -> Result<Message, TransportError> {
    let name = Name::from_ascii(format!("{}.", host))?;
    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, RecordType::A));
    Ok(message)
}

/// Reduces the answer section of a reply to [`AnswerRecord`]s, keeping order
pub fn answer_records(message: &Message) -> Vec<AnswerRecord> {
    message
        .answers()
        .iter()
        .map(|record| {
            let data = match record.data() {
                Some(RData::A(a)) => AnswerData::A(a.0),
                Some(RData::CNAME(cname)) => {
                    let target = cname.0.to_ascii();
                    AnswerData::Cname(target.trim_end_matches('.').to_string())
                }
                _ => AnswerData::Other(record.record_type()),
            };
            AnswerRecord {
                ttl: record.ttl(),
                data,
            }
        })
        .collect()
}

#[async_trait]
impl DnsTransport for UdpTransport {
    async fn query_a(
        &self,
        nameserver: &Nameserver,
        host: &str,
    ) -> Result<Vec<AnswerRecord>, TransportError> {
        let query = build_query(host)?;
        debug!("Sending A query {} for {} to {}", query.id(), host, nameserver);

        let response = timeout(self.timeout, self.exchange(nameserver, &query))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        debug!(
            "Reply {} from {}: {:?}, {} answer(s)",
            response.id(),
            nameserver,
            response.response_code(),
            response.answers().len()
        );
        Ok(answer_records(&response))
    }
}

/// Resolves hostnames against the nameserver pool
pub struct Resolver {
    pool: NameserverPool,
    transport: Arc<dyn DnsTransport>,
}

impl Resolver {
    pub fn new(pool: NameserverPool, transport: Arc<dyn DnsTransport>) -> Self {
        Self { pool, transport }
    }

    pub fn pool(&self) -> &NameserverPool {
        &self.pool
    }

    /// Resolves `host` with a single query to one selected nameserver
    ///
    /// Only answer position 0 is considered. Nothing is retried; a failed
    /// exchange surfaces as [`LookupError::QueryFailed`].
    ///
    /// # Arguments
    /// * `host` - Normalised hostname, without trailing dot
    ///
    /// # Returns
    /// * `Result<Resolution, LookupError>` - Address or alias with its TTL
    pub async fn resolve(&self, host: &str) -> Result<Resolution, LookupError> {
        let nameserver = self.pool.select();
        debug!("Resolving {} via {}", host, nameserver);

        let answers = self
            .transport
            .query_a(nameserver, host)
            .await
            .map_err(|source| LookupError::QueryFailed {
                host: host.to_string(),
                nameserver: nameserver.to_string(),
                source,
            })?;

        let no_usable_answer = || LookupError::NoUsableAnswer {
            host: host.to_string(),
            nameserver: nameserver.to_string(),
        };

        let first = answers.first().ok_or_else(no_usable_answer)?;
        let address = match &first.data {
            AnswerData::A(addr) => ResolvedAddress::Ipv4(*addr),
            AnswerData::Cname(target) => ResolvedAddress::Alias(target.clone()),
            AnswerData::Other(rtype) => {
                debug!("First answer for {} is a {} record", host, rtype);
                return Err(no_usable_answer());
            }
        };

        Ok(Resolution {
            address,
            ttl: first.ttl,
        })
    }
}
