//! Inbound HTTP server: resolve the virtual host, forward, relay
//!
//! Every connection is served on its own tokio task. If a caller goes away
//! mid-request, hyper drops the request future, which also abandons any DNS
//! or cache round trip still in flight for it.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{LookupError, ProxyError};
use crate::http::{BackendClient, ForwardRequest};
use crate::lookup::LookupOrchestrator;
use crate::validation::split_host_port;

/// Shared, read-only state used by every request
pub struct ProxyState {
    pub lookup: LookupOrchestrator,
    pub backend: BackendClient,
}

impl ProxyState {
    pub fn new(lookup: LookupOrchestrator, backend: BackendClient) -> Self {
        Self { lookup, backend }
    }
}

/// Accepts connections on `listener` until `shutdown` completes
///
/// Connections already accepted keep running on their own tasks.
pub async fn serve<F>(listener: TcpListener, state: Arc<ProxyState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(Arc::clone(&state), req));
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Connection from {} ended with error: {}", peer, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
        }
    }

    Ok(())
}

/// Handles one inbound request, mapping every failure to an error response
pub async fn handle<B>(state: Arc<ProxyState>, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Display,
{
    let host = request_host(&req).unwrap_or_default().to_string();
    let span = info_span!("request", id = %Uuid::new_v4(), host = %host);

    let response = async {
        match proxy_request(&state, req).await {
            Ok(response) => response,
            Err(e) => {
                let status = error_status(&e);
                error!("Request for Host <{}> failed: {}", host, e);
                error_response(status)
            }
        }
    }
    .instrument(span)
    .await;

    Ok(response)
}

/// Resolves the request's virtual host and relays it to the resolved backend
pub async fn proxy_request<B>(state: &ProxyState, req: Request<B>) -> Result<Response<Full<Bytes>>, ProxyError>
where
    B: Body,
    B::Error: Display,
{
    let authority = request_host(&req)
        .ok_or_else(|| ProxyError::BadRequest("missing Host header".to_string()))?;
    let (host, port) = split_host_port(authority)
        .ok_or_else(|| ProxyError::BadRequest(format!("malformed Host {:?}", authority)))?;
    let host_header = HeaderValue::from_str(authority)
        .map_err(|_| ProxyError::BadRequest(format!("malformed Host {:?}", authority)))?;

    let address = state.lookup.lookup(host).await?;
    let target = match port {
        Some(port) => format!("{}:{}", address, port),
        None => address.to_string(),
    };

    let (mut parts, body) = req.into_parts();
    parts.headers.insert(HOST, host_header);
    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::BadRequest(format!("failed to read request body: {}", e)))?
        .to_bytes();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let forwarded = state
        .backend
        .forward(ForwardRequest {
            method: parts.method,
            authority: target,
            path_and_query,
            headers: parts.headers,
            body,
        })
        .await?;

    let mut response = Response::new(Full::new(forwarded.body));
    *response.status_mut() = forwarded.status;
    *response.headers_mut() = forwarded.headers;
    Ok(response)
}

/// The virtual host of a request
///
/// An absolute-form target carries its own authority, which takes precedence
/// over any `Host` header (RFC 9112 section 3.2.2).
fn request_host<B>(req: &Request<B>) -> Option<&str> {
    req.uri()
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| req.headers().get(HOST).and_then(|value| value.to_str().ok()))
        .filter(|host| !host.is_empty())
}

/// Status code answered to the caller for a failed request
pub fn error_status(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::BadRequest(_) | ProxyError::Lookup(LookupError::InvalidHostname(_)) => {
            StatusCode::BAD_REQUEST
        }
        ProxyError::Lookup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(status: StatusCode) -> Response<Full<Bytes>> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", reason))));
    *response.status_mut() = status;
    response
}
