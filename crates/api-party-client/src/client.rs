//! The call surface: [`ApiClient`] and the per-endpoint [`EndpointClient`].

use std::sync::Arc;

use api_party_common::{ApiPartyConfig, FormData, FormValue, RequestBody};
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ClientError;
use crate::hooks::{FetchHook, HookRegistry};
use crate::middleware::{HookMiddleware, RetryPlan, build_transport};
use crate::options::CallOptions;
use crate::resolver::{OutboundRequest, resolve};

/// A successful upstream response with its body read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Response status, always 2xx.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Decodes the body as JSON. An empty body decodes as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SerializationError`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Client for calling configured endpoints.
///
/// Cheap to clone; clones share the configuration, hook registry and connection pool.
///
/// # Examples
///
/// ```no_run
/// use api_party_client::{ApiClient, CallOptions};
/// use api_party_common::{ApiPartyConfig, ClientMode, EndpointConfig};
///
/// # async fn example() -> Result<(), api_party_client::ClientError> {
/// let config = ApiPartyConfig::new()
///     .with_client(ClientMode::Always)
///     .with_endpoint(
///         "jsonPlaceholder",
///         EndpointConfig::builder()
///             .url("https://jsonplaceholder.typicode.com")
///             .build(),
///     );
///
/// let client = ApiClient::new(config)?;
/// let post: serde_json::Value = client
///     .fetch(
///         "jsonPlaceholder",
///         "/posts/{id}",
///         CallOptions::new().with_path_param("id", "1"),
///     )
///     .await?;
/// println!("{post}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiClient {
    config: Arc<ApiPartyConfig>,
    hooks: Arc<HookRegistry>,
    http: reqwest::Client,
    origin: Option<Url>,
}

impl ApiClient {
    /// Creates a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigurationError`] if the configuration is invalid, or
    /// [`ClientError::NetworkError`] if the HTTP client cannot be built.
    pub fn new(config: ApiPartyConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder().build()?;
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

    /// Sets the origin of the host application's backend, used for proxied calls.
    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Replaces the underlying HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &ApiPartyConfig {
        &self.config
    }

    /// The process-wide hooks.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// The origin used for proxied calls, if set.
    pub const fn origin(&self) -> Option<&Url> {
        self.origin.as_ref()
    }

    /// A client bound to one endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConfigurationError`] if the endpoint is not configured.
    pub fn endpoint(&self, endpoint_id: impl Into<String>) -> Result<EndpointClient, ClientError> {
        let endpoint_id = endpoint_id.into();
        self.config.endpoint(&endpoint_id)?;
        Ok(EndpointClient {
            client: self.clone(),
            endpoint_id,
        })
    }

    /// Resolves a call without sending it.
    ///
    /// # Errors
    ///
    /// See [`resolve`].
    pub fn resolve(
        &self,
        endpoint_id: &str,
        path: &str,
        options: CallOptions,
    ) -> Result<OutboundRequest, ClientError> {
        resolve(&self.config, &self.hooks, endpoint_id, path, options)
    }

    /// Calls an endpoint and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails, a hook rejects the call, the transport fails,
    /// the upstream answers with a non-success status, the call is aborted, or the body
    /// does not decode into `T`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint_id: &str,
        path: &str,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        self.fetch_raw(endpoint_id, path, options).await?.json()
    }

    /// Calls an endpoint and returns the raw response.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::fetch`], except for decoding.
    pub async fn fetch_raw(
        &self,
        endpoint_id: &str,
        path: &str,
        options: CallOptions,
    ) -> Result<ApiResponse, ClientError> {
        let request = self.resolve(endpoint_id, path, options)?;
        self.send(request).await
    }

    /// Sends a resolved request.
    ///
    /// # Errors
    ///
    /// Returns an error if a hook rejects the call, the transport fails, the upstream
    /// answers with a non-success status or the call is aborted.
    pub async fn send(&self, request: OutboundRequest) -> Result<ApiResponse, ClientError> {
        let url = request.url(self.origin.as_ref())?;

        // Multipart bodies are streamed and cannot be replayed.
        let replayable = !request
            .body
            .as_ref()
            .is_some_and(RequestBody::is_form_data);
        let retry = replayable.then(|| RetryPlan {
            retries: request.retry.retries_for(&request.method),
            delay: request.retry.delay(),
            status_codes: request.retry.status_codes(),
        });

        let hooks: Arc<dyn FetchHook> = Arc::new(request.hooks.clone());
        let transport = build_transport(
            &self.http,
            HookMiddleware::new(request.endpoint_id.as_str(), hooks, None),
            retry,
        );

        let mut headers = request.headers;
        if let Some(directive) = request.cache.and_then(|mode| mode.request_directive())
            && !headers.contains_key(CACHE_CONTROL)
        {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static(directive));
        }

        let mut builder = transport.request(request.method.clone(), url.clone());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body {
            Some(RequestBody::Json(value)) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                builder.body(serde_json::to_string(&value)?)
            }
            Some(RequestBody::Text(text)) => builder.body(text),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
            Some(RequestBody::Form(form)) => builder.multipart(multipart_form(form)?),
            None => builder,
        };
        let builder = builder.headers(headers);

        debug!("Sending {} {url}", request.method);
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, ClientError>(ApiResponse {
                status,
                headers,
                body,
            })
        };

        let response = match request.signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    () = signal.cancelled() => {
                        debug!("Aborted {} {url}", request.method);
                        return Err(ClientError::Aborted);
                    }
                    response = exchange => response?,
                }
            }
            None => exchange.await?,
        };

        if !response.status.is_success() {
            warn!(
                "{} {url} failed with status {}",
                request.method, response.status
            );
            return Err(ClientError::UpstreamError {
                status: response.status,
                body: response.body,
            });
        }

        Ok(response)
    }
}

fn multipart_form(form: FormData) -> Result<reqwest::multipart::Form, ClientError> {
    let mut multipart = reqwest::multipart::Form::new();
    for (name, value) in form.fields {
        multipart = match value {
            FormValue::Text(text) => multipart.text(name, text),
            FormValue::File {
                file_name,
                content_type,
                content,
            } => {
                let mut part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name);
                if let Some(content_type) = content_type {
                    part = part.mime_str(&content_type)?;
                }
                multipart.part(name, part)
            }
        };
    }
    Ok(multipart)
}

/// A client bound to a single endpoint.
///
/// Obtained from [`ApiClient::endpoint`].
#[derive(Debug, Clone)]
pub struct EndpointClient {
    client: ApiClient,
    endpoint_id: String,
}

impl EndpointClient {
    /// The endpoint id.
    pub fn id(&self) -> &str {
        &self.endpoint_id
    }

    /// The underlying client.
    pub const fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Resolves a call without sending it.
    ///
    /// # Errors
    ///
    /// See [`resolve`].
    pub fn resolve(&self, path: &str, options: CallOptions) -> Result<OutboundRequest, ClientError> {
        self.client.resolve(&self.endpoint_id, path, options)
    }

    /// Calls the endpoint and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::fetch`].
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<T, ClientError> {
        self.client.fetch(&self.endpoint_id, path, options).await
    }

    /// Calls the endpoint and returns the raw response.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::fetch_raw`].
    pub async fn fetch_raw(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.client.fetch_raw(&self.endpoint_id, path, options).await
    }
}

impl AsRef<str> for EndpointClient {
    fn as_ref(&self) -> &str {
        &self.endpoint_id
    }
}
