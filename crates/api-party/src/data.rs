//! Reactive data bindings.
//!
//! An [`ApiData`] is an async data cell bound to one endpoint call. It derives a cache
//! key from its inputs, hydrates from a shared [`PayloadCache`], and refetches whenever a
//! watched [`Signal`](crate::Signal) changes. Each new fetch cycle cancels the previous
//! one, so only the most recent cycle can publish a result.
//!
//! ## Example
//!
//! ```no_run
//! use api_party::{ApiClient, ApiData, ApiDataContext, ApiDataOptions, Signal};
//! use api_party_common::{ApiPartyConfig, ClientMode, EndpointConfig};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), api_party::ClientError> {
//! let config = ApiPartyConfig::new()
//!     .with_client(ClientMode::Always)
//!     .with_endpoint(
//!         "jsonPlaceholder",
//!         EndpointConfig::builder()
//!             .url("https://jsonplaceholder.typicode.com")
//!             .build(),
//!     );
//! let context = ApiDataContext::new(ApiClient::new(config)?);
//!
//! let params = Signal::new(BTreeMap::from([("id".to_string(), "1".to_string())]));
//! let post = ApiData::<serde_json::Value>::bind(
//!     &context,
//!     "jsonPlaceholder",
//!     "/posts/{id}",
//!     ApiDataOptions::new().with_path_params(params.clone()),
//! )
//! .await?;
//! println!("{:?}", post.data());
//!
//! // Triggers a refetch of /posts/2.
//! params.set(BTreeMap::from([("id".to_string(), "2".to_string())]));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use api_party_client::{ApiClient, CallOptions, ClientError, FetchHook};
use api_party_common::{
    CacheKeyInput, CacheOption, RequestBody, RetryOptions, explicit_cache_key, merge_headers,
};
use futures::future::select_all;
use http::header::COOKIE;
use http::{HeaderMap, Method};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::PayloadCache;
use crate::signal::{Source, Trigger};

/// Where the binding is being evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RenderSide {
    /// Server-side rendering of an inbound request.
    Server,
    /// In the client application.
    #[default]
    Client,
}

/// Shared state for a set of bindings.
///
/// One context is typically created per inbound request on the server and once per
/// application on the client.
#[derive(Debug, Clone)]
pub struct ApiDataContext {
    client: ApiClient,
    cache: PayloadCache,
    side: RenderSide,
    request_headers: HeaderMap,
}

impl ApiDataContext {
    /// Creates a client-side context with an empty cache.
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            cache: PayloadCache::new(),
            side: RenderSide::Client,
            request_headers: HeaderMap::new(),
        }
    }

    /// Shares an existing payload cache.
    #[must_use]
    pub fn with_cache(mut self, cache: PayloadCache) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the render side.
    #[must_use]
    pub const fn with_side(mut self, side: RenderSide) -> Self {
        self.side = side;
        self
    }

    /// Sets the inbound request headers. Cookies from them are forwarded to endpoints
    /// that allow it.
    #[must_use]
    pub fn with_request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    /// The client used for every fetch.
    pub const fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The payload cache.
    pub const fn cache(&self) -> &PayloadCache {
        &self.cache
    }

    /// The render side.
    pub const fn side(&self) -> RenderSide {
        self.side
    }
}

/// What triggers an automatic refetch.
#[derive(Debug, Default)]
pub enum WatchMode {
    /// The path and every reactive request option.
    #[default]
    Default,
    /// Nothing; refetch only through [`ApiData::refresh`].
    Disabled,
    /// The defaults plus extra triggers.
    Extra(Vec<Trigger>),
}

/// Produces the value exposed while no data is available.
pub type DefaultFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Maps the raw JSON payload before it is stored and decoded.
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Options for [`ApiData::bind`].
///
/// Request options accept static values or signals. `server` and `immediate` default
/// to `true`, `lazy` to `false`.
pub struct ApiDataOptions<T> {
    /// Path parameters.
    pub path_params: Source<BTreeMap<String, String>>,
    /// Query parameters.
    pub query: Source<BTreeMap<String, String>>,
    /// Headers.
    pub headers: Source<HeaderMap>,
    /// HTTP method.
    pub method: Source<Option<Method>>,
    /// Request body.
    pub body: Source<Option<RequestBody>>,
    /// Cache mode or boolean shorthand.
    pub cache: Option<CacheOption>,
    /// Direct or proxied routing.
    pub client: Option<bool>,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Retry pass-through.
    pub retry: RetryOptions,
    /// Caller lifecycle hook.
    pub hooks: Option<Arc<dyn FetchHook>>,
    /// Explicit cache key, replacing the derived one.
    pub key: Option<Source<String>>,
    /// Refetch triggers.
    pub watch: WatchMode,
    /// Run the first fetch in the background instead of awaiting it in `bind`.
    pub lazy: bool,
    /// Fetch when rendering on the server.
    pub server: bool,
    /// Fetch on bind.
    pub immediate: bool,
    /// Value exposed while no data is available.
    pub default: Option<DefaultFn<T>>,
    /// Payload transform.
    pub transform: Option<TransformFn>,
    /// Top-level keys kept from object payloads.
    pub pick: Option<Vec<String>>,
}

impl<T> Default for ApiDataOptions<T> {
    fn default() -> Self {
        Self {
            path_params: Source::default(),
            query: Source::default(),
            headers: Source::default(),
            method: Source::default(),
            body: Source::default(),
            cache: None,
            client: None,
            timeout: None,
            retry: RetryOptions::default(),
            hooks: None,
            key: None,
            watch: WatchMode::Default,
            lazy: false,
            server: true,
            immediate: true,
            default: None,
            transform: None,
            pick: None,
        }
    }
}

impl<T> ApiDataOptions<T> {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the path parameters.
    #[must_use]
    pub fn with_path_params(mut self, params: impl Into<Source<BTreeMap<String, String>>>) -> Self {
        self.path_params = params.into();
        self
    }

    /// Sets the query parameters.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<Source<BTreeMap<String, String>>>) -> Self {
        self.query = query.into();
        self
    }

    /// Sets the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: impl Into<Source<HeaderMap>>) -> Self {
        self.headers = headers.into();
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<Source<Option<Method>>>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Source<Option<RequestBody>>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a static JSON body.
    #[must_use]
    pub fn with_json(self, body: Value) -> Self {
        self.with_body(Some(RequestBody::Json(body)))
    }

    /// Sets the cache mode.
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

    /// Sets the retry pass-through.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the caller lifecycle hook.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl FetchHook + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Sets an explicit cache key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Source<String>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the refetch triggers.
    #[must_use]
    pub fn with_watch(mut self, watch: WatchMode) -> Self {
        self.watch = watch;
        self
    }

    /// Sets whether the first fetch runs in the background.
    #[must_use]
    pub const fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Sets whether to fetch when rendering on the server.
    #[must_use]
    pub const fn with_server(mut self, server: bool) -> Self {
        self.server = server;
        self
    }

    /// Sets whether to fetch on bind.
    #[must_use]
    pub const fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    /// Sets the payload transform.
    #[must_use]
    pub fn with_transform(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Keeps only the named top-level keys of object payloads.
    #[must_use]
    pub fn with_pick<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pick = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    fn triggers(&mut self, path: &Source<String>) -> Vec<Trigger> {
        let extra = match std::mem::take(&mut self.watch) {
            WatchMode::Disabled => return Vec::new(),
            WatchMode::Default => Vec::new(),
            WatchMode::Extra(triggers) => triggers,
        };
        [
            path.trigger(),
            self.path_params.trigger(),
            self.query.trigger(),
            self.headers.trigger(),
            self.method.trigger(),
            self.body.trigger(),
        ]
        .into_iter()
        .flatten()
        .chain(extra)
        .collect()
    }
}

/// Lifecycle of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataStatus {
    /// No fetch has run yet.
    Idle,
    /// A fetch is in flight.
    Pending,
    /// The last fetch produced data.
    Success,
    /// The last fetch failed.
    Error,
}

/// Snapshot of a binding.
#[derive(Debug, Clone)]
pub struct DataState<T> {
    /// Current data, or the default value.
    pub data: Option<T>,
    /// Error from the last fetch.
    pub error: Option<Arc<ClientError>>,
    /// Lifecycle status.
    pub status: DataStatus,
}

#[derive(Debug, Default)]
struct Cycle {
    generation: u64,
    signal: Option<CancellationToken>,
}

struct Inner<T> {
    context: ApiDataContext,
    endpoint_id: String,
    path: Source<String>,
    options: ApiDataOptions<T>,
    forward_cookies: bool,
    state: watch::Sender<DataState<T>>,
    cycle: Mutex<Cycle>,
    watcher: Option<AbortHandle>,
}

impl<T> Inner<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn default_data(&self) -> Option<T> {
        self.options.default.as_ref().map(|default| default())
    }

    fn key(&self) -> String {
        if let Some(key) = &self.options.key {
            return explicit_cache_key(&key.get());
        }
        let path = self.path.get();
        let path_params = self.options.path_params.get();
        let query = self.options.query.get();
        let method = self.options.method.get();
        let body = self.options.body.get();
        CacheKeyInput {
            endpoint_id: &self.endpoint_id,
            path: &path,
            path_params: &path_params,
            query: &query,
            method: method.as_ref(),
            body: body.as_ref(),
        }
        .derive()
    }

    fn headers(&self) -> HeaderMap {
        let caller = self.options.headers.get();
        let cookies = self.forward_cookies.then(|| {
            let mut cookies = HeaderMap::new();
            for value in self.context.request_headers.get_all(COOKIE) {
                cookies.append(COOKIE, value.clone());
            }
            cookies
        });
        merge_headers([Some(&caller), cookies.as_ref()])
    }

    fn call_options(&self, signal: CancellationToken) -> CallOptions {
        CallOptions {
            path_params: self.options.path_params.get(),
            query: self.options.query.get(),
            headers: self.headers(),
            method: self.options.method.get(),
            body: self.options.body.get(),
            cache: self.options.cache,
            client: self.options.client,
            timeout: self.options.timeout,
            retry: self.options.retry.clone(),
            hooks: self.options.hooks.clone(),
            signal: Some(signal),
        }
    }

    fn project(&self, mut payload: Value) -> Value {
        if let Some(transform) = &self.options.transform {
            payload = transform(payload);
        }
        if let (Some(keys), Value::Object(map)) = (&self.options.pick, &mut payload) {
            map.retain(|key, _| keys.contains(key));
        }
        payload
    }

    async fn fetch(&self, signal: CancellationToken) -> Result<Value, ClientError> {
        let path = self.path.get();
        let response = self
            .context
            .client
            .fetch_raw(&self.endpoint_id, &path, self.call_options(signal))
            .await?;
        Ok(self.project(response.json()?))
    }

    async fn run_cycle(&self) {
        let (generation, signal) = {
            let mut cycle = self.cycle.lock().await;
            if let Some(previous) = cycle.signal.take() {
                debug!("Cancelling in-flight request to {}", self.endpoint_id);
                previous.cancel();
            }
            cycle.generation += 1;
            let signal = CancellationToken::new();
            cycle.signal = Some(signal.clone());
            (cycle.generation, signal)
        };

        let key = self.key();
        self.state
            .send_modify(|state| state.status = DataStatus::Pending);
        let result = self.fetch(signal).await;

        let mut cycle = self.cycle.lock().await;
        if cycle.generation != generation {
            debug!("Discarding superseded response for {key}");
            return;
        }
        cycle.signal = None;

        let decoded = result.and_then(|payload| {
            let data = serde_json::from_value::<T>(payload.clone())?;
            Ok((payload, data))
        });
        match decoded {
            Ok((payload, data)) => {
                self.context.cache.insert(key, payload);
                self.state.send_replace(DataState {
                    data: Some(data),
                    error: None,
                    status: DataStatus::Success,
                });
            }
            Err(error) => {
                warn!("Fetching {key} from {} failed: {error}", self.endpoint_id);
                self.state.send_replace(DataState {
                    data: self.default_data(),
                    error: Some(Arc::new(error)),
                    status: DataStatus::Error,
                });
            }
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.abort();
        }
        if let Some(signal) = self.cycle.get_mut().signal.take() {
            signal.cancel();
        }
    }
}

fn spawn_watcher<T>(inner: Weak<Inner<T>>, mut triggers: Vec<Trigger>) -> AbortHandle
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while !triggers.is_empty() {
            let (alive, index, _) =
                select_all(triggers.iter_mut().map(|trigger| Box::pin(trigger.changed()))).await;
            if !alive {
                triggers.swap_remove(index);
                continue;
            }
            if let Some(inner) = inner.upgrade() {
                tokio::spawn(async move { inner.run_cycle().await });
            }
        }
    })
    .abort_handle()
}

/// A reactive async data cell bound to one endpoint call.
///
/// Cheap to clone; clones share state. Dropping the last clone stops the watcher and
/// cancels any in-flight fetch.
pub struct ApiData<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ApiData<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ApiData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiData")
            .field("endpoint_id", &self.inner.endpoint_id)
            .field("status", &self.inner.state.borrow().status)
            .finish_non_exhaustive()
    }
}

impl<T> ApiData<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Binds `path` on `endpoint`, which is an endpoint id or an
    /// [`EndpointClient`](api_party_client::EndpointClient).
    ///
    /// Unless `lazy` is set, the first fetch completes before this returns. Fetch
    /// failures do not fail the bind; they are reported through [`ApiData::error`].
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConfigurationError`] if the endpoint is not configured
    /// - [`ClientError::PolicyError`] if a direct call is requested while client calls
    ///   are disabled; no request is made
    pub async fn bind(
        context: &ApiDataContext,
        endpoint: impl AsRef<str>,
        path: impl Into<Source<String>>,
        mut options: ApiDataOptions<T>,
    ) -> Result<Self, ClientError> {
        let endpoint_id = endpoint.as_ref().to_string();
        let config = context.client.config();
        let endpoint_config = config.endpoint(&endpoint_id)?;

        let client = options
            .client
            .unwrap_or_else(|| config.client.default_client());
        if client && !config.client.allows_client() {
            return Err(ClientError::PolicyError);
        }

        let path = path.into();
        let triggers = options.triggers(&path);
        let initial = DataState {
            data: options.default.as_ref().map(|default| default()),
            error: None,
            status: DataStatus::Idle,
        };
        let fetch_on_bind = options.immediate
            && (options.server || context.side == RenderSide::Client);
        let lazy = options.lazy;

        let inner = Arc::new_cyclic(|weak| Inner {
            context: context.clone(),
            endpoint_id,
            path,
            options,
            forward_cookies: endpoint_config.cookies,
            state: watch::channel(initial).0,
            cycle: Mutex::new(Cycle::default()),
            watcher: (!triggers.is_empty()).then(|| spawn_watcher(weak.clone(), triggers)),
        });

        let key = inner.key();
        debug!("Bound {} with cache key {key}", inner.endpoint_id);

        let hydrated = context
            .cache
            .get(&key)
            .and_then(|payload| match serde_json::from_value::<T>(payload) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Ignoring cached payload for {key}: {e}");
                    None
                }
            });
        let is_hydrated = hydrated.is_some();
        if let Some(data) = hydrated {
            inner.state.send_replace(DataState {
                data: Some(data),
                error: None,
                status: DataStatus::Success,
            });
        }

        let data = Self { inner };
        if fetch_on_bind && !is_hydrated {
            if lazy {
                let inner = Arc::clone(&data.inner);
                tokio::spawn(async move { inner.run_cycle().await });
            } else {
                data.inner.run_cycle().await;
            }
        }
        Ok(data)
    }

    /// The current cache key.
    pub fn key(&self) -> String {
        self.inner.key()
    }

    /// The current snapshot.
    pub fn state(&self) -> DataState<T> {
        self.inner.state.borrow().clone()
    }

    /// Current data, or the default value.
    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    /// Error from the last fetch.
    pub fn error(&self) -> Option<Arc<ClientError>> {
        self.inner.state.borrow().error.clone()
    }

    /// Lifecycle status.
    pub fn status(&self) -> DataStatus {
        self.inner.state.borrow().status
    }

    /// Returns `true` while a fetch is in flight.
    pub fn pending(&self) -> bool {
        self.status() == DataStatus::Pending
    }

    /// A receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<DataState<T>> {
        self.inner.state.subscribe()
    }

    /// Runs a fetch cycle, cancelling any cycle still in flight.
    pub async fn refresh(&self) {
        self.inner.run_cycle().await;
    }

    /// Alias of [`ApiData::refresh`], for bindings created with `immediate = false`.
    pub async fn execute(&self) {
        self.refresh().await;
    }

    /// Cancels any in-flight fetch, resets the state and drops the cached payload.
    pub async fn clear(&self) {
        let mut cycle = self.inner.cycle.lock().await;
        if let Some(signal) = cycle.signal.take() {
            signal.cancel();
        }
        cycle.generation += 1;
        self.inner.context.cache.remove(&self.inner.key());
        self.inner.state.send_replace(DataState {
            data: self.inner.default_data(),
            error: None,
            status: DataStatus::Idle,
        });
    }
}
