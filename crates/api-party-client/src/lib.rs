//! # api-party-client
//!
//! Client library for calling named upstream APIs, directly or through the api-party proxy.
//!
//! A call names an endpoint id and a path template. The resolver turns it into an
//! [`OutboundRequest`]:
//! - The endpoint is looked up in the [`ApiPartyConfig`](api_party_common::ApiPartyConfig)
//! - Path parameters are substituted and the query is merged
//! - Authorization, endpoint and caller headers are merged losslessly
//! - The call is routed directly or through `/api/<base path>/<id>/proxy`
//!
//! The transport is `reqwest` behind `reqwest-middleware`, with lifecycle hooks fired
//! once per attempt and retries handled by `reqwest-retry`.
//!
//! ## Example
//!
//! ```no_run
//! use api_party_client::{ApiClient, CallOptions, HookRegistry};
//! use api_party_common::{ApiPartyConfig, EndpointConfig};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ApiPartyConfig::new().with_endpoint(
//!     "cms",
//!     EndpointConfig::builder()
//!         .url("https://cms.example.com/api")
//!         .token("secret")
//!         .build(),
//! );
//!
//! // Calls go through the proxy route of the application at this origin.
//! let client = ApiClient::new(config)?
//!     .with_hooks(HookRegistry::new())
//!     .with_origin(Url::parse("http://localhost:3000")?);
//!
//! let pages: serde_json::Value = client
//!     .fetch("cms", "/pages", CallOptions::new().with_query("limit", "10"))
//!     .await?;
//! println!("{pages}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod hooks;
pub mod middleware;
pub mod options;
pub mod resolver;

pub use client::{ApiClient, ApiResponse, EndpointClient};
pub use error::{ClientError, HookError};
pub use hooks::{
    CombinedHooks, FetchHook, HookKind, HookName, HookRegistry, RequestContext,
    RequestErrorContext, ResponseContext,
};
pub use middleware::{HookMiddleware, RetryPlan, StatusCodeRetry, build_transport};
pub use options::CallOptions;
pub use resolver::{OutboundRequest, resolve};
