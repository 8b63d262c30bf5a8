//! Common utilities for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nsproxy::cache::{CacheConnection, CacheStore};
use nsproxy::dns::{AnswerRecord, DnsTransport};
use nsproxy::error::{StoreError, TransportError};
use nsproxy::nameserver::Nameserver;
use nsproxy::store::MemoryStore;
use tokio::net::UdpSocket;
use trust_dns_resolver::proto::op::{Message, MessageType};
use trust_dns_resolver::proto::rr::rdata::{A, CNAME, TXT};
use trust_dns_resolver::proto::rr::{Name, RData, Record};

/// An answer record served by [`FakeNameserver`]
#[derive(Debug, Clone)]
pub enum FakeAnswer {
    A(Ipv4Addr, u32),
    Cname(&'static str, u32),
    Txt(u32),
}

/// Authoritative nameserver on a loopback UDP socket answering from a fixed zone
pub struct FakeNameserver {
    pub addr: SocketAddr,
    pub queries: Arc<AtomicUsize>,
}

impl FakeNameserver {
    /// Serves `zone` (lower-case name without trailing dot -> answers);
    /// unknown names get an empty answer section
    pub async fn start(zone: HashMap<String, Vec<FakeAnswer>>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&queries);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let Ok(query) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                let reply = answer(&query, &zone);
                if let Ok(bytes) = reply.to_vec() {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        });

        Ok(Self { addr, queries })
    }

    pub fn nameserver(&self) -> Nameserver {
        Nameserver::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

fn answer(query: &Message, zone: &HashMap<String, Vec<FakeAnswer>>) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_authoritative(true);
    reply.add_queries(query.queries().to_vec());

    if let Some(question) = query.queries().first() {
        let name = question.name().clone();
        let key = name.to_utf8().trim_end_matches('.').to_string();
        for record in zone.get(&key).cloned().unwrap_or_default() {
            reply.add_answer(to_record(&name, record));
        }
    }
    reply
}

fn to_record(name: &Name, answer: FakeAnswer) -> Record {
    match answer {
        FakeAnswer::A(addr, ttl) => Record::from_rdata(name.clone(), ttl, RData::A(A(addr))),
        FakeAnswer::Cname(target, ttl) => {
            let target = Name::from_ascii(target).expect("valid CNAME target");
            Record::from_rdata(name.clone(), ttl, RData::CNAME(CNAME(target)))
        }
        FakeAnswer::Txt(ttl) => Record::from_rdata(
            name.clone(),
            ttl,
            RData::TXT(TXT::new(vec!["v=spf1 -all".to_string()])),
        ),
    }
}

/// UDP socket that swallows every query, for exercising timeouts
pub struct SilentNameserver {
    pub addr: SocketAddr,
    _socket: Arc<UdpSocket>,
}

impl SilentNameserver {
    pub async fn start() -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        Ok(Self {
            addr: socket.local_addr()?,
            _socket: socket,
        })
    }

    pub fn nameserver(&self) -> Nameserver {
        Nameserver::new(self.addr.ip().to_string(), self.addr.port())
    }
}

/// How [`ScriptedTransport`] answers a query
#[derive(Debug, Clone)]
pub enum Script {
    Answers(Vec<AnswerRecord>),
    Timeout,
}

/// In-memory transport returning scripted answers and recording every call
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: AtomicUsize,
    asked: Mutex<Vec<Nameserver>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, host: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(host.to_string(), script);
        self
    }

    pub fn answer_a(self, host: &str, addr: Ipv4Addr, ttl: u32) -> Self {
        self.script(host, Script::Answers(vec![AnswerRecord::a(addr, ttl)]))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn asked(&self) -> Vec<Nameserver> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl DnsTransport for ScriptedTransport {
    async fn query_a(
        &self,
        nameserver: &Nameserver,
        host: &str,
    ) -> Result<Vec<AnswerRecord>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.asked.lock().unwrap().push(nameserver.clone());
        let script = self.scripts.lock().unwrap().get(host).cloned();
        match script {
            Some(Script::Answers(answers)) => Ok(answers),
            Some(Script::Timeout) => Err(TransportError::Timeout(Duration::from_secs(2))),
            None => Ok(Vec::new()),
        }
    }
}

/// Wraps a [`MemoryStore`] and counts the operations issued against it
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub connects: Arc<AtomicUsize>,
    pub gets: Arc<AtomicUsize>,
    pub sets: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl CacheConnection for CountingStore {
    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut conn = self.inner.connect().await?;
        conn.get(key).await
    }

    async fn set_nx_ex(&mut self, key: &str, value: &str, ttl_secs: u32) -> Result<bool, StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        let mut conn = self.inner.connect().await?;
        conn.set_nx_ex(key, value, ttl_secs).await
    }
}

/// Which store operation [`BrokenStore`] fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakage {
    Connect,
    Reads,
    Writes,
    HangReads,
}

/// Store failing (or hanging on) one kind of operation
#[derive(Clone)]
pub struct BrokenStore {
    pub breakage: Breakage,
    pub sets: Arc<AtomicUsize>,
}

impl BrokenStore {
    pub fn new(breakage: Breakage) -> Self {
        Self {
            breakage,
            sets: Arc::new(AtomicUsize::new(0)),
        }
    }
}

fn refused() -> StoreError {
    StoreError::Unavailable(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl CacheStore for BrokenStore {
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, StoreError> {
        if self.breakage == Breakage::Connect {
            return Err(refused());
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl CacheConnection for BrokenStore {
    async fn get(&mut self, _key: &str) -> Result<Option<String>, StoreError> {
        match self.breakage {
            Breakage::Reads => Err(refused()),
            Breakage::HangReads => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn set_nx_ex(&mut self, _key: &str, _value: &str, _ttl_secs: u32) -> Result<bool, StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        match self.breakage {
            Breakage::Writes => Err(refused()),
            _ => Ok(true),
        }
    }
}
