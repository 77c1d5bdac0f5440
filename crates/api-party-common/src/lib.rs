//! # api-party-common
//!
//! Common types for declaring upstream API endpoints and describing calls to them.
//!
//! This crate holds the pieces shared by the client call surface, the reactive data layer
//! and the proxy server:
//! - Endpoint configuration and routing policy
//! - Lossless header merging
//! - Path template substitution and URL joining
//! - Cache modes, request bodies and retry pass-through options
//! - Deterministic cache keys
//!
//! ## Example
//!
//! ```
//! use api_party_common::{ApiPartyConfig, ClientMode, EndpointConfig};
//!
//! let config = ApiPartyConfig::new()
//!     .with_client(ClientMode::Enabled)
//!     .with_endpoint(
//!         "jsonPlaceholder",
//!         EndpointConfig::builder()
//!             .url("https://jsonplaceholder.typicode.com")
//!             .build(),
//!     );
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(
//!     config.proxy_base("jsonPlaceholder"),
//!     "/api/__api_party/jsonPlaceholder/proxy"
//! );
//! ```

/// Deterministic cache keys for reactive bindings.
pub mod cache_key;
/// Endpoint configuration and routing policy.
///
/// Contains the process-wide endpoint mapping read by every call.
pub mod config;
/// Lossless header merging.
pub mod headers;
/// Path templates and URL joining.
pub mod path;
/// Cache modes, bodies and retry options carried by a call.
pub mod request;

pub use cache_key::{CACHE_KEY_PREFIX, CacheKeyInput, explicit_cache_key};
pub use config::{
    ApiPartyConfig, ClientMode, ConfigError, DEFAULT_BASE_PATH, EndpointConfig, ServerOptions,
    is_origin_relative,
};
pub use headers::merge_headers;
pub use path::{PathParamError, join_url, resolve_path_params};
pub use request::{
    CacheMode, CacheOption, DEFAULT_RETRY_STATUS_CODES, FormData, FormValue, RequestBody,
    RetryOptions,
};
