//! # api-party
//!
//! Call named upstream APIs without exposing their credentials.
//!
//! Endpoints are declared once in an [`ApiPartyConfig`]. Calls are either sent
//! directly to the upstream API or routed through the api-party proxy, which holds the
//! tokens. On top of the one-shot [`ApiClient`] this crate adds [`ApiData`], a reactive
//! data cell that caches its payload and refetches when its inputs change.
//!
//! ## Example
//!
//! ```no_run
//! use api_party::{ApiClient, ApiPartyConfig, CallOptions, ClientMode, EndpointConfig};
//!
//! # async fn example() -> Result<(), api_party::ClientError> {
//! let config = ApiPartyConfig::new()
//!     .with_client(ClientMode::Always)
//!     .with_endpoint(
//!         "github",
//!         EndpointConfig::builder().url("https://api.github.com").build(),
//!     );
//!
//! let client = ApiClient::new(config)?;
//! let repo: serde_json::Value = client
//!     .fetch(
//!         "github",
//!         "/repos/{owner}/{repo}",
//!         CallOptions::new()
//!             .with_path_param("owner", "rust-lang")
//!             .with_path_param("repo", "rust"),
//!     )
//!     .await?;
//! println!("{}", repo["full_name"]);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod data;
pub mod signal;

pub use api_party_client::{
    ApiClient, ApiResponse, CallOptions, ClientError, EndpointClient, FetchHook, HookError,
    HookKind, HookName, HookRegistry, OutboundRequest, RequestContext, RequestErrorContext,
    ResponseContext,
};
pub use api_party_common::{
    ApiPartyConfig, CacheMode, CacheOption, ClientMode, EndpointConfig, FormData, RequestBody,
    RetryOptions,
};
pub use cache::PayloadCache;
pub use data::{
    ApiData, ApiDataContext, ApiDataOptions, DataState, DataStatus, RenderSide, WatchMode,
};
pub use signal::{Signal, Source, Trigger};

/// Re-export of the client crate.
pub use api_party_client as client;
/// Re-export of the common crate.
pub use api_party_common as common;
