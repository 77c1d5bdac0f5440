//! The proxy route handler.
//!
//! Handles `/api/<base path>/<endpoint id>/proxy/<path>`:
//! 1. Validate the endpoint, the residual path and any base URL override
//! 2. Forward the request upstream with the endpoint's credentials
//! 3. Race the forward against hook rejections, see [`crate::hook_race`]

use std::collections::HashSet;
use std::sync::Arc;

use api_party_client::{CombinedHooks, HookMiddleware, HookRegistry, build_transport};
use api_party_common::{ApiPartyConfig, EndpointConfig, is_origin_relative, join_url};
use axum::body::HttpBody;
use axum::extract::{Path, Request, State};
use axum::response::Response;
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ProxyError, ServerError};
use crate::forward::{ForwardRequest, forward_headers, forward_request};
use crate::hook_race::{SignallingHooks, hook_error_channel};

/// Shared state of the proxy routes.
#[derive(Debug, Clone)]
pub struct ProxyState {
    config: Arc<ApiPartyConfig>,
    hooks: Arc<HookRegistry>,
    http: reqwest::Client,
    origin: Option<Url>,
}

impl ProxyState {
    /// Creates the state for `config`.
    ///
    /// Upstream redirects are passed back to the caller, not followed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client cannot be built.
    pub fn new(config: ApiPartyConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            hooks: Arc::new(HookRegistry::new()),
            http,
            origin: None,
        })
    }

    /// Sets the process-wide hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Replaces the upstream HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Sets the origin that origin-relative endpoint URLs such as `/api` resolve against.
    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &ApiPartyConfig {
        &self.config
    }
}

/// Route parameters.
///
/// The residual path is not taken from here: the router decodes it, and the proxy
/// forwards it as received. See [`raw_residual_path`].
#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    /// Endpoint id.
    pub endpoint_id: String,
}

/// The still-encoded part of `uri_path` after the route prefix `route_prefix`.
///
/// `%2F` and `%3F` in a path parameter stay encoded, so they reach the upstream as
/// part of one segment.
pub fn raw_residual_path<'a>(uri_path: &'a str, route_prefix: &str) -> &'a str {
    let segments = route_prefix.trim_matches('/').split('/').count();
    uri_path
        .strip_prefix('/')
        .unwrap_or(uri_path)
        .splitn(segments + 1, '/')
        .nth(segments)
        .unwrap_or("")
}

/// Name of the header that overrides the base URL for `endpoint_id`.
pub fn override_header(endpoint_id: &str) -> String {
    format!("{endpoint_id}-Endpoint-Url")
}

/// Rejects paths that resolve to a different origin than a neutral local one, such as
/// `https://evil.example/x` or `//evil.example/x`.
///
/// # Errors
///
/// Returns [`ProxyError::BadRequest`] for such paths.
pub fn validate_path(path: &str) -> Result<(), ProxyError> {
    let local =
        Url::parse("http://localhost").map_err(|e| ProxyError::Configuration(e.to_string()))?;
    match local.join(path) {
        Ok(resolved) if resolved.origin() == local.origin() => Ok(()),
        _ => Err(ProxyError::BadRequest(
            "Absolute URLs are not allowed".to_string(),
        )),
    }
}

/// The base URL to forward to: the override header if allowed, the endpoint URL otherwise.
///
/// # Errors
///
/// Returns [`ProxyError::BadRequest`] if the override is neither the endpoint URL nor
/// in its allow-list.
pub fn base_url<'a>(
    endpoint_id: &str,
    endpoint: &'a EndpointConfig,
    headers: &'a HeaderMap,
) -> Result<&'a str, ProxyError> {
    let requested = headers
        .get(override_header(endpoint_id).as_str())
        .map(|value| {
            value.to_str().map_err(|_| {
                ProxyError::BadRequest("Base URL override is not valid UTF-8".to_string())
            })
        })
        .transpose()?
        .filter(|url| !url.is_empty());

    match requested {
        None => Ok(&endpoint.url),
        Some(url) if endpoint.allows_base_url(url) => Ok(url),
        Some(url) => Err(ProxyError::BadRequest(format!(
            "Base URL \"{url}\" is not allowed"
        ))),
    }
}

/// Resolves an origin-relative base URL against `origin`; absolute ones are returned
/// unchanged.
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`] if `base` is origin-relative and there is no
/// origin.
pub fn absolute_base(base: &str, origin: Option<&Url>) -> Result<String, ProxyError> {
    if !is_origin_relative(base) {
        return Ok(base.to_string());
    }
    let origin = origin.ok_or_else(|| {
        ProxyError::Configuration(format!(
            "Base URL \"{base}\" is origin-relative but no origin is configured"
        ))
    })?;
    Ok(join_url(origin.as_str(), [base]))
}

/// Builds the upstream URL: base URL, residual path, inbound query, then endpoint
/// query parameters the caller did not set.
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`] if the result is not a valid URL.
pub fn upstream_url(
    base: &str,
    path: &str,
    inbound_query: Option<&str>,
    endpoint: &EndpointConfig,
) -> Result<Url, ProxyError> {
    let target = join_url(base, [path]);
    let mut url = Url::parse(&target)
        .map_err(|e| ProxyError::Configuration(format!("Invalid upstream URL '{target}': {e}")))?;

    if let Some(query) = inbound_query.filter(|query| !query.is_empty()) {
        url.set_query(Some(query));
    }

    let present: HashSet<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
    let missing: Vec<_> = endpoint
        .query
        .iter()
        .filter(|(key, _)| !present.contains(*key))
        .collect();
    if !missing.is_empty() {
        url.query_pairs_mut().extend_pairs(missing);
    }
    Ok(url)
}

/// Headers sent upstream: end-to-end inbound headers, minus cookies unless allowed and
/// minus the override header, plus endpoint credentials and static headers the caller
/// did not set.
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`] if the endpoint headers are invalid.
pub fn upstream_headers(
    endpoint_id: &str,
    endpoint: &EndpointConfig,
    inbound: &HeaderMap,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = forward_headers(inbound);
    headers.remove(override_header(endpoint_id).as_str());
    if !endpoint.cookies {
        headers.remove(COOKIE);
    }

    if !headers.contains_key(AUTHORIZATION)
        && let Some(authorization) = endpoint.authorization()
    {
        headers.extend(authorization);
    }
    let static_headers = endpoint.static_headers(endpoint_id)?;
    for name in static_headers.keys() {
        if !headers.contains_key(name) {
            for value in static_headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    Ok(headers)
}

/// Proxy route handler.
#[tracing::instrument(
    name = "proxy",
    skip_all,
    fields(endpoint_id = %params.endpoint_id, request_id = %Uuid::new_v4())
)]
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    Path(params): Path<ProxyParams>,
    request: Request,
) -> Result<Response, ProxyError> {
    proxy(&state, params, request).await.inspect_err(|e| {
        warn!(status = e.status().as_u16(), "Rejected proxied request: {e}");
    })
}

async fn proxy(
    state: &ProxyState,
    params: ProxyParams,
    request: Request,
) -> Result<Response, ProxyError> {
    let ProxyParams { endpoint_id } = params;
    let endpoint = state.config.endpoint(&endpoint_id)?;

    let (parts, body) = request.into_parts();
    let path = raw_residual_path(parts.uri.path(), &state.config.proxy_base(&endpoint_id));
    validate_path(path)?;

    let base = absolute_base(
        base_url(&endpoint_id, endpoint, &parts.headers)?,
        state.origin.as_ref(),
    )?;
    let target = upstream_url(&base, path, parts.uri.query(), endpoint)?;
    let headers = upstream_headers(&endpoint_id, endpoint, &parts.headers)?;
    // Streamed upstream as it arrives.
    let body = (!body.is_end_stream())
        .then(|| reqwest::Body::wrap_stream(body.into_data_stream()));
    let method = parts.method.clone();

    let (signal, mut watcher) = hook_error_channel();
    let hooks = SignallingHooks::new(
        Arc::new(CombinedHooks::new(None, Arc::clone(&state.hooks))),
        signal,
    );
    let transport = build_transport(
        &state.http,
        HookMiddleware::new(endpoint_id.as_str(), Arc::new(hooks), Some(Arc::new(parts))),
        None,
    );

    let forward = forward_request(
        &transport,
        ForwardRequest {
            method,
            target,
            headers,
            body,
        },
    );

    tokio::select! {
        biased;
        Some(error) = watcher.rejected() => Err(ProxyError::Hook(error)),
        response = forward => match watcher.try_take() {
            Some(error) => Err(ProxyError::Hook(error)),
            None => {
                debug!(status = response.status().as_u16(), "Upstream responded");
                Ok(response)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::collections::BTreeMap;

    use http::HeaderValue;

    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig::builder()
            .url("https://api.example.com/v1")
            .token("secret")
            .query(BTreeMap::from([("key".to_string(), "abc".to_string())]))
            .headers(BTreeMap::from([("x-client".to_string(), "party".to_string())]))
            .allowed_urls(vec!["https://staging.example.com/v1".to_string()])
            .build()
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("users/42").is_ok());
        assert!(validate_path("").is_ok());
        assert!(validate_path("https://evil.example/x").is_err());
        assert!(validate_path("//evil.example/x").is_err());
    }

    #[test]
    fn test_raw_residual_path() {
        let prefix = "/api/__api_party/users/proxy";
        assert_eq!(
            raw_residual_path("/api/__api_party/users/proxy/files/a%2Fb%3Fc", prefix),
            "files/a%2Fb%3Fc"
        );
        assert_eq!(
            raw_residual_path("/api/__api_party/users/proxy/users/42", prefix),
            "users/42"
        );
        assert_eq!(raw_residual_path("/api/__api_party/users/proxy", prefix), "");
        assert_eq!(raw_residual_path("/api/__api_party/users/proxy/", prefix), "");
        assert_eq!(
            raw_residual_path("/api/a/b/users/proxy/x", "/api/a/b/users/proxy"),
            "x"
        );
    }

    #[test]
    fn test_validate_path_checks_encoded_form() {
        assert!(validate_path("files/a%2Fb%3Fc").is_ok());
        assert!(validate_path("https:%2F%2Fevil.example%2Fsteal").is_err());
    }

    #[test]
    fn test_base_url_override() {
        let endpoint = endpoint();
        let mut headers = HeaderMap::new();
        assert_eq!(
            base_url("api", &endpoint, &headers).unwrap(),
            "https://api.example.com/v1"
        );

        headers.insert(
            "api-endpoint-url",
            HeaderValue::from_static("https://staging.example.com/v1"),
        );
        assert_eq!(
            base_url("api", &endpoint, &headers).unwrap(),
            "https://staging.example.com/v1"
        );

        headers.insert(
            "api-endpoint-url",
            HeaderValue::from_static("https://evil.example"),
        );
        let err = base_url("api", &endpoint, &headers).unwrap_err();
        assert_eq!(err.to_string(), "Base URL \"https://evil.example\" is not allowed");
    }

    #[test]
    fn test_absolute_base() {
        let origin = Url::parse("http://localhost:3000").unwrap();
        assert_eq!(
            absolute_base("https://api.example.com/v1", None).unwrap(),
            "https://api.example.com/v1"
        );
        assert_eq!(
            absolute_base("/api", Some(&origin)).unwrap(),
            "http://localhost:3000/api"
        );
        assert!(matches!(
            absolute_base("/api", None),
            Err(ProxyError::Configuration(_))
        ));
    }

    #[test]
    fn test_upstream_url() {
        let endpoint = endpoint();
        let url = upstream_url("https://api.example.com/v1", "users/42", Some("page=2"), &endpoint)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/users/42?page=2&key=abc"
        );

        let url =
            upstream_url("https://api.example.com/v1", "", Some("key=mine"), &endpoint).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1?key=mine");

        let url = upstream_url("https://api.example.com/v1", "files/a%2Fb%3Fc", None, &endpoint)
            .unwrap();
        assert_eq!(url.path(), "/v1/files/a%2Fb%3Fc");
        assert_eq!(url.query(), Some("key=abc"));
    }

    #[test]
    fn test_upstream_headers() {
        let endpoint = endpoint();
        let mut inbound = HeaderMap::new();
        inbound.insert(COOKIE, HeaderValue::from_static("session=1"));
        inbound.insert(
            "api-endpoint-url",
            HeaderValue::from_static("https://api.example.com/v1"),
        );
        inbound.insert("x-client", HeaderValue::from_static("caller"));

        let headers = upstream_headers("api", &endpoint, &inbound).unwrap();

        assert!(!headers.contains_key(COOKIE));
        assert!(!headers.contains_key("api-endpoint-url"));
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
        assert_eq!(headers["x-client"], "caller");
    }
}
