//! Per-call options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use api_party_common::{CacheOption, RequestBody, RetryOptions};
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;

use crate::hooks::FetchHook;

/// Options for a single call.
///
/// Every field is optional. Unset fields fall back to the endpoint configuration or the
/// transport defaults.
///
/// # Examples
///
/// ```
/// use api_party_client::CallOptions;
/// use http::Method;
///
/// let options = CallOptions::new()
///     .with_method(Method::POST)
///     .with_path_param("id", "42")
///     .with_query("expand", "posts")
///     .with_json(serde_json::json!({"name": "Ada"}));
///
/// assert_eq!(options.path_params["id"], "42");
/// ```
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Values for `{name}` segments in the path template.
    pub path_params: BTreeMap<String, String>,
    /// Query parameters. Override endpoint query parameters with the same key.
    pub query: BTreeMap<String, String>,
    /// Extra headers, merged after the endpoint headers.
    pub headers: HeaderMap,
    /// HTTP method. Defaults to `GET`.
    pub method: Option<Method>,
    /// Request body.
    pub body: Option<RequestBody>,
    /// Cache mode or boolean shorthand.
    pub cache: Option<CacheOption>,
    /// Call the upstream API directly instead of through the proxy route.
    pub client: Option<bool>,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Retry pass-through.
    pub retry: RetryOptions,
    /// The caller's lifecycle hook.
    pub hooks: Option<Arc<dyn FetchHook>>,
    /// Abort signal. Cancelling it resolves the call with [`ClientError::Aborted`](crate::ClientError::Aborted).
    pub signal: Option<CancellationToken>,
}

impl CallOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a path parameter.
    #[must_use]
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Replaces all path parameters.
    #[must_use]
    pub fn with_path_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    /// Sets a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Appends headers, keeping existing entries.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.headers.append(name, value.clone());
        }
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON request body.
    #[must_use]
    pub fn with_json(self, body: serde_json::Value) -> Self {
        self.with_body(RequestBody::Json(body))
    }

    /// Sets the cache mode, either a [`CacheMode`](api_party_common::CacheMode) or a boolean.
    #[must_use]
    pub fn with_cache(mut self, cache: impl Into<CacheOption>) -> Self {
        self.cache = Some(cache.into());
        self
    }

    /// Requests direct (`true`) or proxied (`false`) routing.
    #[must_use]
    pub const fn with_client(mut self, client: bool) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the number of retries after the first attempt.
    #[must_use]
    pub const fn with_retry(mut self, retry: u32) -> Self {
        self.retry.retry = Some(retry);
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.retry_delay = Some(delay);
        self
    }

    /// Sets the statuses that trigger a retry.
    #[must_use]
    pub fn with_retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry.retry_status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Sets the caller's lifecycle hook.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl FetchHook + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Sets the abort signal.
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("path_params", &self.path_params)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("cache", &self.cache)
            .field("client", &self.client)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("hooks", &self.hooks.is_some())
            .field("signal", &self.signal)
            .finish()
    }
}
