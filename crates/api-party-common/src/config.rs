//! Endpoint configuration shared by the call surfaces and the proxy.
//!
//! The configuration is process-wide and read-only at request time. It is usually
//! deserialized from TOML by the proxy server and built in code by library users.
//!
//! ## Example Configuration
//!
//! ```toml
//! client = "always"
//!
//! [server]
//! base_path = "__api_party"
//!
//! [endpoints.jsonPlaceholder]
//! url = "https://jsonplaceholder.typicode.com"
//! token = "secret"
//! cookies = true
//! allowed_urls = ["https://staging.jsonplaceholder.typicode.com"]
//!
//! [endpoints.jsonPlaceholder.headers]
//! X-Client = "api-party"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::path::join_url;

/// Default base path segment of the internal proxy route.
pub const DEFAULT_BASE_PATH: &str = "__api_party";

/// Errors raised while reading or validating endpoint configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// No endpoint is registered under this id.
    #[error("Unknown API endpoint \"{0}\"")]
    UnknownEndpoint(String),

    /// The endpoint id cannot be used as a route segment.
    #[error("Invalid endpoint id \"{0}\"")]
    InvalidEndpointId(String),

    /// A configured URL is neither absolute nor origin-relative.
    #[error("Endpoint \"{endpoint}\" has an invalid URL \"{url}\": {reason}")]
    InvalidUrl {
        /// Endpoint the URL belongs to.
        endpoint: String,
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A static header name or value is not valid HTTP.
    #[error("Endpoint \"{endpoint}\" has an invalid header \"{name}\"")]
    InvalidHeader {
        /// Endpoint the header belongs to.
        endpoint: String,
        /// Header name as written in the configuration.
        name: String,
    },
}

/// Whether calls may skip the proxy and go straight to the upstream API.
///
/// Written in TOML as `client = false`, `client = true` or `client = "always"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawClientMode", into = "RawClientMode")]
pub enum ClientMode {
    /// Every call is proxied; requesting a direct call is a policy error.
    #[default]
    Disabled,
    /// Direct calls are allowed when a caller asks for them.
    Enabled,
    /// Calls are direct unless a caller opts out.
    Always,
}

impl ClientMode {
    /// Returns `true` if direct calls are permitted at all.
    pub const fn allows_client(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// The routing default for calls that do not set `client` themselves.
    pub const fn default_client(self) -> bool {
        matches!(self, Self::Always)
    }
}

impl fmt::Display for ClientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "false"),
            Self::Enabled => write!(f, "true"),
            Self::Always => write!(f, "always"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawClientMode {
    Flag(bool),
    Named(String),
}

impl TryFrom<RawClientMode> for ClientMode {
    type Error = String;

    fn try_from(raw: RawClientMode) -> Result<Self, Self::Error> {
        match raw {
            RawClientMode::Flag(false) => Ok(Self::Disabled),
            RawClientMode::Flag(true) => Ok(Self::Enabled),
            RawClientMode::Named(name) if name == "always" => Ok(Self::Always),
            RawClientMode::Named(name) => Err(format!(
                "invalid client mode \"{name}\", expected a boolean or \"always\""
            )),
        }
    }
}

impl From<ClientMode> for RawClientMode {
    fn from(mode: ClientMode) -> Self {
        match mode {
            ClientMode::Disabled => Self::Flag(false),
            ClientMode::Enabled => Self::Flag(true),
            ClientMode::Always => Self::Named("always".to_string()),
        }
    }
}

/// Options for the internal proxy route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Path segment under `/api` that hosts every proxy route.
    #[serde(default = "default_base_path", alias = "basePath")]
    pub base_path: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
        }
    }
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

/// A single named upstream API.
///
/// # Examples
///
/// ```
/// use api_party_common::EndpointConfig;
///
/// let endpoint = EndpointConfig::builder()
///     .url("https://api.example.com")
///     .token("secret")
///     .cookies(true)
///     .build();
///
/// assert!(endpoint.allows_base_url("https://api.example.com"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct EndpointConfig {
    /// Base URL of the upstream API.
    #[builder(setter(into))]
    pub url: String,

    /// Bearer token sent as `Authorization` on every call.
    #[serde(default, skip_serializing)]
    #[builder(default, setter(transform = |token: impl Into<String>| Some(SecretString::new(token.into().into()))))]
    pub token: Option<SecretString>,

    /// Query parameters added to every call. Callers override them per key.
    #[serde(default)]
    #[builder(default)]
    pub query: BTreeMap<String, String>,

    /// Static headers added to every call.
    #[serde(default)]
    #[builder(default)]
    pub headers: BTreeMap<String, String>,

    /// Whether inbound cookies are forwarded to this endpoint.
    #[serde(default)]
    #[builder(default)]
    pub cookies: bool,

    /// Base URLs a proxied caller may switch to with the override header.
    #[serde(default, alias = "allowedUrls")]
    #[builder(default)]
    pub allowed_urls: Vec<String>,
}

impl EndpointConfig {
    /// The `Authorization` header derived from the token, if one is set.
    pub fn authorization(&self) -> Option<HeaderMap> {
        let token = self.token.as_ref()?;
        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())).ok()?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Some(headers)
    }

    /// Static headers as a [`HeaderMap`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeader`] if a name or value is not valid HTTP.
    pub fn static_headers(&self, endpoint_id: &str) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let invalid = || ConfigError::InvalidHeader {
                endpoint: endpoint_id.to_string(),
                name: name.clone(),
            };
            let header_name = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.append(header_name, header_value);
        }
        Ok(headers)
    }

    /// Returns `true` if `base_url` is the configured URL or on the allow-list.
    pub fn allows_base_url(&self, base_url: &str) -> bool {
        base_url == self.url || self.allowed_urls.iter().any(|allowed| allowed == base_url)
    }

    /// Returns `true` if the endpoint URL is relative to the application origin,
    /// e.g. `/api`.
    pub fn is_origin_relative(&self) -> bool {
        is_origin_relative(&self.url)
    }

    fn validate(&self, endpoint_id: &str) -> Result<(), ConfigError> {
        for url in std::iter::once(&self.url).chain(&self.allowed_urls) {
            if is_origin_relative(url) {
                continue;
            }
            url::Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
                endpoint: endpoint_id.to_string(),
                url: url.clone(),
                reason: e.to_string(),
            })?;
        }
        if self.token.is_some() && self.authorization().is_none() {
            return Err(ConfigError::InvalidHeader {
                endpoint: endpoint_id.to_string(),
                name: AUTHORIZATION.to_string(),
            });
        }
        self.static_headers(endpoint_id).map(|_| ())
    }
}

/// Returns `true` for a path-absolute URL such as `/api`. `//host` is not one.
pub fn is_origin_relative(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

/// Process-wide configuration: the endpoint mapping plus routing policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiPartyConfig {
    /// Endpoints keyed by id.
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,

    /// Whether direct (non-proxied) calls are allowed.
    #[serde(default)]
    pub client: ClientMode,

    /// Proxy route options.
    #[serde(default)]
    pub server: ServerOptions,
}

impl ApiPartyConfig {
    /// Creates an empty configuration with client calls disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, id: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.endpoints.insert(id.into(), endpoint);
        self
    }

    /// Sets the client routing policy.
    #[must_use]
    pub const fn with_client(mut self, client: ClientMode) -> Self {
        self.client = client;
        self
    }

    /// Sets the proxy route base path.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.server.base_path = base_path.into();
        self
    }

    /// Looks up an endpoint by id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEndpoint`] if the id is not configured.
    pub fn endpoint(&self, id: &str) -> Result<&EndpointConfig, ConfigError> {
        self.endpoints
            .get(id)
            .ok_or_else(|| ConfigError::UnknownEndpoint(id.to_string()))
    }

    /// The internal proxy route for an endpoint, e.g. `/api/__api_party/users/proxy`.
    pub fn proxy_base(&self, endpoint_id: &str) -> String {
        join_url("/api", [self.server.base_path.as_str(), endpoint_id, "proxy"])
    }

    /// Validates every endpoint.
    ///
    /// Checks that:
    /// - Endpoint ids are non-empty single path segments
    /// - Every URL and allowed URL is absolute or origin-relative (`/api`)
    /// - Static headers and tokens are valid HTTP header values
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, endpoint) in &self.endpoints {
            if id.is_empty() || id.contains(['/', '?', '#']) {
                return Err(ConfigError::InvalidEndpointId(id.clone()));
            }
            endpoint.validate(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    fn sample_config_toml() -> &'static str {
        r#"
client = "always"

[server]
base_path = "gateway"

[endpoints.jsonPlaceholder]
url = "https://jsonplaceholder.typicode.com"
token = "secret-token"
cookies = true
allowed_urls = ["https://staging.example.com"]

[endpoints.jsonPlaceholder.query]
lang = "en"

[endpoints.jsonPlaceholder.headers]
X-Client = "api-party"

[endpoints.petStore]
url = "https://petstore.example.com/v3"
        "#
    }

    #[test]
    fn test_parse_config() {
        let config: ApiPartyConfig = toml::from_str(sample_config_toml()).unwrap();

        assert_eq!(config.client, ClientMode::Always);
        assert_eq!(config.server.base_path, "gateway");
        assert_eq!(config.endpoints.len(), 2);

        let endpoint = config.endpoint("jsonPlaceholder").unwrap();
        assert!(endpoint.cookies);
        assert_eq!(endpoint.query.get("lang").map(String::as_str), Some("en"));
        assert_eq!(endpoint.allowed_urls, vec!["https://staging.example.com"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config: ApiPartyConfig = toml::from_str(
            r#"
[endpoints.api]
url = "https://api.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.client, ClientMode::Disabled);
        assert_eq!(config.server.base_path, DEFAULT_BASE_PATH);
        let endpoint = config.endpoint("api").unwrap();
        assert!(!endpoint.cookies);
        assert!(endpoint.token.is_none());
        assert!(endpoint.allowed_urls.is_empty());
    }

    #[test]
    fn test_client_mode_parsing() {
        #[derive(Deserialize)]
        struct Wrapper {
            client: ClientMode,
        }

        let parse = |s: &str| toml::from_str::<Wrapper>(s).map(|w| w.client);
        assert_eq!(parse("client = false").unwrap(), ClientMode::Disabled);
        assert_eq!(parse("client = true").unwrap(), ClientMode::Enabled);
        assert_eq!(parse("client = \"always\"").unwrap(), ClientMode::Always);
        assert!(parse("client = \"sometimes\"").is_err());
    }

    #[test]
    fn test_client_mode_policy() {
        assert!(!ClientMode::Disabled.allows_client());
        assert!(ClientMode::Enabled.allows_client());
        assert!(!ClientMode::Enabled.default_client());
        assert!(ClientMode::Always.default_client());
    }

    #[test]
    fn test_unknown_endpoint() {
        let config = ApiPartyConfig::new();
        assert_eq!(
            config.endpoint("missing").unwrap_err(),
            ConfigError::UnknownEndpoint("missing".to_string())
        );
    }

    #[test]
    fn test_proxy_base() {
        let config = ApiPartyConfig::new();
        assert_eq!(config.proxy_base("users"), "/api/__api_party/users/proxy");

        let config = config.with_base_path("/custom/");
        assert_eq!(config.proxy_base("users"), "/api/custom/users/proxy");
    }

    #[test]
    fn test_authorization_header() {
        let endpoint = EndpointConfig::builder()
            .url("https://api.example.com")
            .token("abc")
            .build();

        let headers = endpoint.authorization().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");

        let anonymous = EndpointConfig::builder().url("https://api.example.com").build();
        assert!(anonymous.authorization().is_none());
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let endpoint = EndpointConfig::builder()
            .url("https://api.example.com")
            .token("super-secret")
            .build();

        assert!(!format!("{endpoint:?}").contains("super-secret"));
    }

    #[test]
    fn test_allows_base_url() {
        let endpoint = EndpointConfig::builder()
            .url("https://api.example.com")
            .allowed_urls(vec!["https://eu.api.example.com".to_string()])
            .build();

        assert!(endpoint.allows_base_url("https://api.example.com"));
        assert!(endpoint.allows_base_url("https://eu.api.example.com"));
        assert!(!endpoint.allows_base_url("https://evil.example"));
    }

    #[test]
    fn test_validate_accepts_origin_relative_url() {
        let config = ApiPartyConfig::new()
            .with_endpoint("api", EndpointConfig::builder().url("/api").build());

        assert!(config.validate().is_ok());
        assert!(config.endpoint("api").unwrap().is_origin_relative());
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        for url in ["api", "//evil.example/api", ""] {
            let config = ApiPartyConfig::new()
                .with_endpoint("api", EndpointConfig::builder().url(url).build());

            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })),
                "{url:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_header() {
        let mut headers = BTreeMap::new();
        headers.insert("Bad Header".to_string(), "value".to_string());
        let config = ApiPartyConfig::new().with_endpoint(
            "api",
            EndpointConfig::builder()
                .url("https://api.example.com")
                .headers(headers)
                .build(),
        );

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint_id() {
        let config = ApiPartyConfig::new().with_endpoint(
            "a/b",
            EndpointConfig::builder().url("https://api.example.com").build(),
        );

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidEndpointId("a/b".to_string()))
        );
    }
}
