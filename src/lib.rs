// nsproxy: host-resolving HTTP reverse proxy
// Exposes the resolution core and the proxy layer as a library

pub mod cache;
pub mod cli;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod lookup;
pub mod nameserver;
pub mod proxy;
pub mod store;
pub mod validation;
