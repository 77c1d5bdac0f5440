//! Generic reverse-proxy primitive.
//!
//! Forwards one request upstream and streams the response back. Any failure while
//! forwarding, including a hook rejection inside the transport, becomes a 503.
//! Upstream error statuses are passed through unchanged.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderName, Method};
use reqwest_middleware::ClientWithMiddleware;
use tracing::{debug, warn};
use url::Url;

use crate::error::ProxyError;

/// Connection-scoped headers that are never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copies end-to-end request headers, dropping hop-by-hop headers, `host` and
/// `content-length`.
pub fn forward_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name) || name == HOST || name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// A request ready to be forwarded.
#[derive(Debug)]
pub struct ForwardRequest {
    /// Inbound method.
    pub method: Method,
    /// Upstream URL.
    pub target: Url,
    /// Headers to send.
    pub headers: HeaderMap,
    /// Inbound body, streamed; `None` sends no body.
    pub body: Option<reqwest::Body>,
}

/// Forwards `request` through `transport`.
///
/// Never fails: transport and hook errors produce a 503 response.
pub async fn forward_request(transport: &ClientWithMiddleware, request: ForwardRequest) -> Response {
    debug!("Forwarding {} {}", request.method, request.target);

    let mut builder = transport
        .request(request.method, request.target.clone())
        .headers(request.headers);
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    match builder.send().await {
        Ok(upstream) => into_response(upstream),
        Err(e) => {
            warn!("Forwarding to {} failed: {e}", request.target);
            ProxyError::ServiceUnavailable("Service Unavailable".to_string()).into_response()
        }
    }
}

fn into_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::with_capacity(upstream.headers().len());
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name) || name == CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
