//! HTTP client forwarding proxied requests to resolved backends
//!
//! This module wraps a pooled reqwest client tuned for talking to many
//! backends over plain HTTP/1.1:
//! - Connection pooling with bounded idle connections per host
//! - TCP keepalive for connection reuse
//! - A request timeout covering connect, send and response body
//! - No redirect following, redirects are relayed to the caller as-is
//! - No system proxy, backends are always dialled directly

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use tracing::debug;

use crate::error::ProxyError;

/// Headers that describe a single hop and are never forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Removes hop-by-hop headers, including any named in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(reqwest::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// A request to relay to a backend
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    /// Resolved `address[:port]`
    pub authority: String,
    /// Path and query exactly as received
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A backend's reply, ready to copy back to the caller
#[derive(Debug)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Pooled HTTP client for backend requests
///
/// # Examples
///
/// ```
/// use nsproxy::http::BackendClient;
/// use std::time::Duration;
///
/// # fn example() -> anyhow::Result<()> {
/// let client = BackendClient::new(Duration::from_secs(30))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
}

impl BackendClient {
    /// Creates a new client with pooled connection settings
    ///
    /// Initializes a client with:
    /// - 50 max idle connections per host
    /// - 30 second connection idle timeout
    /// - 60 second TCP keepalive
    ///
    /// # Arguments
    /// * `timeout` - Whole-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .context("Failed to create backend HTTP client")?;

        Ok(Self { client })
    }

    /// Sends `request` to `http://{authority}{path_and_query}` and reads the reply
    ///
    /// Request headers are sent as given, so the caller's `Host` header
    /// still names the virtual host rather than the resolved address.
    ///
    /// # Errors
    /// [`ProxyError::Upstream`] if the backend cannot be reached, times out,
    /// or fails while sending its body.
    pub async fn forward(&self, request: ForwardRequest) -> Result<ForwardResponse, ProxyError> {
        let url = format!("http://{}{}", request.authority, request.path_and_query);
        debug!("Forwarding {} {}", request.method, url);

        let upstream_error = |source| ProxyError::Upstream {
            authority: request.authority.clone(),
            source,
        };

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);

        let response = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(upstream_error)?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await.map_err(upstream_error)?;

        debug!("Backend {} answered {} with {} bytes", request.authority, status, body.len());
        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    }
}
