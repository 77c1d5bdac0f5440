//! # api-party-server
//!
//! Credential-hiding reverse proxy for the endpoints of an [`ApiPartyConfig`].
//!
//! Requests to `/api/<base path>/<endpoint id>/proxy/<path>` are validated, given the
//! endpoint's token, static headers and query parameters, and forwarded upstream. The
//! upstream response is streamed back unchanged. Process-wide hooks from a
//! [`HookRegistry`] run around every forward; a hook that rejects with a status
//! decides the response status.
//!
//! ```no_run
//! use api_party_common::{ApiPartyConfig, EndpointConfig};
//! use api_party_server::{ProxyState, serve};
//!
//! # async fn run() -> api_party_server::Result<()> {
//! let config = ApiPartyConfig::new().with_endpoint(
//!     "users",
//!     EndpointConfig::builder()
//!         .url("https://users.example.com")
//!         .token("secret")
//!         .build(),
//! );
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! serve(listener, ProxyState::new(config)?).await
//! # }
//! ```
//!
//! [`ApiPartyConfig`]: api_party_common::ApiPartyConfig
//! [`HookRegistry`]: api_party_client::HookRegistry

pub mod config;
pub mod error;
pub mod forward;
pub mod hook_race;
pub mod proxy;
pub mod server;

pub use config::{DEFAULT_LISTEN, ServerConfig};
pub use error::{ProxyError, Result, ServerError};
pub use forward::{ForwardRequest, forward_headers, forward_request};
pub use hook_race::{HookErrorSignal, HookErrorWatcher, SignallingHooks, hook_error_channel};
pub use proxy::{ProxyState, proxy_handler};
pub use server::{router, serve};
