//! Resolution of a logical call into a fully specified outbound request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api_party_common::{
    ApiPartyConfig, CacheMode, RequestBody, RetryOptions, is_origin_relative, join_url,
    merge_headers, resolve_path_params,
};
use http::{HeaderMap, Method};
use log::debug;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ClientError;
use crate::hooks::{CombinedHooks, HookRegistry};
use crate::options::CallOptions;

/// A resolved call, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Endpoint being called.
    pub endpoint_id: String,
    /// HTTP method.
    pub method: Method,
    /// Endpoint URL for direct calls, the internal proxy route otherwise.
    pub base_url: String,
    /// Path with every parameter substituted.
    pub path: String,
    /// Endpoint query merged with the caller query.
    pub query: BTreeMap<String, String>,
    /// Authorization, endpoint headers and caller headers, losslessly merged.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<RequestBody>,
    /// Normalized cache mode, if the caller set one.
    pub cache: Option<CacheMode>,
    /// `true` for direct calls, `false` for proxied ones.
    pub client: bool,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Retry pass-through.
    pub retry: RetryOptions,
    /// Caller hook wrapped around the registry hooks.
    pub hooks: CombinedHooks,
    /// Abort signal.
    pub signal: Option<CancellationToken>,
}

impl OutboundRequest {
    /// Base URL and path joined, without the query.
    ///
    /// Proxied targets are origin-relative, e.g. `/api/__api_party/users/proxy/users/42`.
    pub fn target(&self) -> String {
        join_url(&self.base_url, [self.path.as_str()])
    }

    /// The absolute URL including the query.
    ///
    /// Proxied targets, and direct targets with an origin-relative endpoint URL such
    /// as `/api`, are resolved against `origin`, the host application's own backend.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigurationError`] if the URL cannot be parsed, or if the
    /// target is origin-relative and no origin is given.
    pub fn url(&self, origin: Option<&Url>) -> Result<Url, ClientError> {
        let target = self.target();
        let mut url = if self.client && !is_origin_relative(&target) {
            Url::parse(&target)
        } else {
            let origin = origin.ok_or_else(|| {
                ClientError::ConfigurationError(format!(
                    "An application origin is required to call {target}"
                ))
            })?;
            origin.join(&target)
        }
        .map_err(|e| ClientError::ConfigurationError(format!("Invalid URL '{target}': {e}")))?;

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}

/// Resolves a call to `endpoint_id` at `path`.
///
/// - The cache shorthand is normalized: `true` becomes `default`, `false` becomes `no-store`.
/// - Routing defaults to direct only when client calls are `always` on.
/// - Query parameters merge with the caller winning; headers merge losslessly in the
///   order authorization, endpoint headers, caller headers.
///
/// # Errors
///
/// - [`ClientError::ConfigurationError`] for an unknown endpoint or invalid endpoint headers
/// - [`ClientError::PolicyError`] if a direct call is requested while client calls are disabled
/// - [`ClientError::ValidationError`] if a path parameter is missing
pub fn resolve(
    config: &ApiPartyConfig,
    registry: &Arc<HookRegistry>,
    endpoint_id: &str,
    path: &str,
    options: CallOptions,
) -> Result<OutboundRequest, ClientError> {
    let endpoint = config.endpoint(endpoint_id)?;

    let cache = options.cache.map(|cache| cache.normalize());

    let client = options.client.unwrap_or_else(|| config.client.default_client());
    if client && !config.client.allows_client() {
        return Err(ClientError::PolicyError);
    }

    let path = resolve_path_params(path, &options.path_params)?;

    let base_url = if client {
        endpoint.url.clone()
    } else {
        config.proxy_base(endpoint_id)
    };

    let mut query = endpoint.query.clone();
    query.extend(options.query);

    let authorization = endpoint.authorization();
    let static_headers = endpoint.static_headers(endpoint_id)?;
    let headers = merge_headers([
        authorization.as_ref(),
        Some(&static_headers),
        Some(&options.headers),
    ]);

    let method = options.method.unwrap_or(Method::GET);
    debug!(
        "Resolved {method} {endpoint_id}{path} ({})",
        if client { "direct" } else { "proxied" }
    );

    Ok(OutboundRequest {
        endpoint_id: endpoint_id.to_string(),
        method,
        base_url,
        path,
        query,
        headers,
        body: options.body,
        cache,
        client,
        timeout: options.timeout,
        retry: options.retry,
        hooks: CombinedHooks::new(options.hooks, Arc::clone(registry)),
        signal: options.signal,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use api_party_common::{ClientMode, EndpointConfig};
    use http::HeaderValue;
    use http::header::{AUTHORIZATION, SET_COOKIE};

    use super::*;

    fn config(client: ClientMode) -> ApiPartyConfig {
        ApiPartyConfig::new().with_client(client).with_endpoint(
            "users",
            EndpointConfig::builder()
                .url("https://api.example.com/v1")
                .token("secret")
                .query(BTreeMap::from([
                    ("lang".to_string(), "en".to_string()),
                    ("page".to_string(), "1".to_string()),
                ]))
                .headers(BTreeMap::from([(
                    "set-cookie".to_string(),
                    "endpoint=1".to_string(),
                )]))
                .build(),
        )
    }

    fn registry() -> Arc<HookRegistry> {
        Arc::new(HookRegistry::new())
    }

    #[test]
    fn test_unknown_endpoint_is_configuration_error() {
        let err = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "nope",
            "/",
            CallOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::ConfigurationError(_)));
    }

    #[test]
    fn test_client_call_rejected_when_disabled() {
        let err = resolve(
            &config(ClientMode::Disabled),
            &registry(),
            "users",
            "/",
            CallOptions::new().with_client(true),
        )
        .unwrap_err();
        assert!(err.is_policy_error());
    }

    #[test]
    fn test_routing_defaults() {
        let proxied = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/users",
            CallOptions::new(),
        )
        .unwrap();
        assert!(!proxied.client);
        assert_eq!(proxied.base_url, "/api/__api_party/users/proxy");
        assert_eq!(proxied.target(), "/api/__api_party/users/proxy/users");

        let direct = resolve(
            &config(ClientMode::Always),
            &registry(),
            "users",
            "/users",
            CallOptions::new(),
        )
        .unwrap();
        assert!(direct.client);
        assert_eq!(direct.target(), "https://api.example.com/v1/users");

        let opted_out = resolve(
            &config(ClientMode::Always),
            &registry(),
            "users",
            "/users",
            CallOptions::new().with_client(false),
        )
        .unwrap();
        assert!(!opted_out.client);
    }

    #[test]
    fn test_path_params_substituted() {
        let request = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/users/{id}",
            CallOptions::new().with_path_param("id", "42"),
        )
        .unwrap();
        assert_eq!(request.path, "/users/42");

        let err = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/users/{id}",
            CallOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::ValidationError(_)));
    }

    #[test]
    fn test_query_caller_wins() {
        let request = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/",
            CallOptions::new().with_query("page", "2"),
        )
        .unwrap();
        assert_eq!(request.query["page"], "2");
        assert_eq!(request.query["lang"], "en");
    }

    #[test]
    fn test_headers_merge_losslessly() {
        let mut caller = HeaderMap::new();
        caller.append(SET_COOKIE, HeaderValue::from_static("caller=1"));

        let request = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/",
            CallOptions::new().with_headers(caller),
        )
        .unwrap();

        assert_eq!(request.headers[AUTHORIZATION], "Bearer secret");
        let cookies: Vec<_> = request.headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["endpoint=1", "caller=1"]);
    }

    #[test]
    fn test_cache_shorthand_normalized() {
        let request = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/",
            CallOptions::new().with_cache(false),
        )
        .unwrap();
        assert_eq!(request.cache, Some(CacheMode::NoStore));

        let request = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/",
            CallOptions::new().with_cache(CacheMode::ForceCache),
        )
        .unwrap();
        assert_eq!(request.cache, Some(CacheMode::ForceCache));
    }

    #[test]
    fn test_url_needs_origin_when_proxied() {
        let request = resolve(
            &config(ClientMode::Enabled),
            &registry(),
            "users",
            "/users",
            CallOptions::new(),
        )
        .unwrap();

        assert!(request.url(None).is_err());

        let origin = Url::parse("http://localhost:3000").unwrap();
        let url = request.url(Some(&origin)).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/api/__api_party/users/proxy/users?lang=en&page=1"
        );
    }

    #[test]
    fn test_origin_relative_endpoint_called_directly() {
        let config = ApiPartyConfig::new()
            .with_client(ClientMode::Always)
            .with_endpoint("local", EndpointConfig::builder().url("/api").build());
        let request = resolve(
            &config,
            &registry(),
            "local",
            "/users/{id}",
            CallOptions::new().with_path_param("id", "7"),
        )
        .unwrap();

        assert!(request.client);
        assert!(matches!(
            request.url(None),
            Err(ClientError::ConfigurationError(_))
        ));

        let origin = Url::parse("http://localhost:3000").unwrap();
        let url = request.url(Some(&origin)).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/users/7");
    }
}
