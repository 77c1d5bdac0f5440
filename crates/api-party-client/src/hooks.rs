//! Lifecycle hooks fired around every outbound call.
//!
//! Hooks come from two places. Callers pass one per call through
//! [`CallOptions::with_hooks`](crate::CallOptions::with_hooks), and the host application
//! registers process-wide hooks in a [`HookRegistry`] under the names
//! `api-party:request`, `api-party:request:<id>`, `api-party:response` and
//! `api-party:response:<id>`.
//!
//! For every call the caller hook runs first, then the endpoint-specific hooks, then the
//! global ones. The same order applies to requests and responses.
//!
//! ## Example
//!
//! ```
//! use api_party_client::{FetchHook, HookError, HookRegistry, RequestContext};
//! use async_trait::async_trait;
//!
//! struct RequireTenant;
//!
//! #[async_trait]
//! impl FetchHook for RequireTenant {
//!     async fn on_request(&self, ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
//!         if ctx.request.headers().contains_key("x-tenant") {
//!             Ok(())
//!         } else {
//!             Err(HookError::forbidden("Missing tenant"))
//!         }
//!     }
//! }
//!
//! let registry = HookRegistry::new().with_endpoint_hook("billing", RequireTenant);
//! assert_eq!(registry.len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use http::request::Parts;
use log::{debug, warn};
use url::Url;

use crate::error::HookError;

/// Context handed to request hooks.
///
/// The outgoing request is fully mutable: hooks may add headers, rewrite the URL or
/// replace the body. Returning an error aborts the call.
pub struct RequestContext<'a> {
    /// Endpoint being called.
    pub endpoint_id: &'a str,
    /// The request about to be sent.
    pub request: &'a mut reqwest::Request,
    /// The inbound request that triggered this call, on the proxy path.
    pub event: Option<&'a Parts>,
}

/// Context handed to response hooks.
pub struct ResponseContext<'a> {
    /// Endpoint being called.
    pub endpoint_id: &'a str,
    /// Method of the request that produced this response.
    pub method: &'a Method,
    /// URL of the request that produced this response.
    pub url: &'a Url,
    /// The upstream response. Hooks may change its headers or status.
    pub response: &'a mut reqwest::Response,
    /// The inbound request that triggered this call, on the proxy path.
    pub event: Option<&'a Parts>,
}

/// Context handed to request error hooks.
pub struct RequestErrorContext<'a> {
    /// Endpoint being called.
    pub endpoint_id: &'a str,
    /// Method of the failed request.
    pub method: &'a Method,
    /// URL of the failed request.
    pub url: &'a Url,
    /// The transport failure.
    pub error: &'a reqwest_middleware::Error,
    /// The inbound request that triggered this call, on the proxy path.
    pub event: Option<&'a Parts>,
}

/// Extension points around a single outbound request.
///
/// Every method defaults to a no-op. Hooks must not keep references from a context
/// past their own invocation.
#[async_trait]
pub trait FetchHook: Send + Sync {
    /// Called before the request is sent, once per attempt.
    ///
    /// # Errors
    ///
    /// An error aborts the call and reaches the caller unchanged.
    async fn on_request(&self, _ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called after a response arrives, whatever its status.
    ///
    /// # Errors
    ///
    /// An error replaces the response with the hook error.
    async fn on_response(&self, _ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the transport fails to produce a response.
    ///
    /// # Errors
    ///
    /// Errors are logged; the transport error is still returned.
    async fn on_request_error(&self, _ctx: &RequestErrorContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called after [`FetchHook::on_response`] for statuses of 400 and above.
    ///
    /// # Errors
    ///
    /// An error replaces the response with the hook error.
    async fn on_response_error(&self, _ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Which side of the call a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Before the request is sent.
    Request,
    /// After the response arrives.
    Response,
}

/// Registered name of a hook, e.g. `api-party:request:users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookName<'a> {
    /// Request or response side.
    pub kind: HookKind,
    /// Endpoint scope, or `None` for the global hook.
    pub endpoint_id: Option<&'a str>,
}

impl<'a> HookName<'a> {
    /// The global hook of `kind`.
    pub const fn global(kind: HookKind) -> Self {
        Self {
            kind,
            endpoint_id: None,
        }
    }

    /// The hook of `kind` scoped to one endpoint.
    pub const fn endpoint(kind: HookKind, endpoint_id: &'a str) -> Self {
        Self {
            kind,
            endpoint_id: Some(endpoint_id),
        }
    }
}

impl fmt::Display for HookName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.kind {
            HookKind::Request => "request",
            HookKind::Response => "response",
        };
        match self.endpoint_id {
            Some(id) => write!(f, "api-party:{side}:{id}"),
            None => write!(f, "api-party:{side}"),
        }
    }
}

/// Process-wide hooks registered by the host application.
#[derive(Clone, Default)]
pub struct HookRegistry {
    global: Vec<Arc<dyn FetchHook>>,
    endpoints: HashMap<String, Vec<Arc<dyn FetchHook>>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook for every endpoint.
    #[must_use]
    pub fn with_hook(mut self, hook: impl FetchHook + 'static) -> Self {
        self.global.push(Arc::new(hook));
        self
    }

    /// Registers a hook for one endpoint.
    #[must_use]
    pub fn with_endpoint_hook(
        mut self,
        endpoint_id: impl Into<String>,
        hook: impl FetchHook + 'static,
    ) -> Self {
        self.endpoints
            .entry(endpoint_id.into())
            .or_default()
            .push(Arc::new(hook));
        self
    }

    /// Total number of registered hooks.
    pub fn len(&self) -> usize {
        self.global.len() + self.endpoints.values().map(Vec::len).sum::<usize>()
    }

    /// Returns `true` if no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scoped<'a>(
        &'a self,
        kind: HookKind,
        endpoint_id: &'a str,
    ) -> impl Iterator<Item = (HookName<'a>, &'a Arc<dyn FetchHook>)> {
        let endpoint = self
            .endpoints
            .get(endpoint_id)
            .into_iter()
            .flatten()
            .map(move |hook| (HookName::endpoint(kind, endpoint_id), hook));
        let global = self
            .global
            .iter()
            .map(move |hook| (HookName::global(kind), hook));
        endpoint.chain(global)
    }

    /// Fires the request hooks for `ctx.endpoint_id`: endpoint-specific first, then global.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first hook error.
    pub async fn call_request(&self, ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
        let endpoint_id = ctx.endpoint_id;
        for (name, hook) in self.scoped(HookKind::Request, endpoint_id) {
            debug!("Calling {name}");
            hook.on_request(ctx).await.inspect_err(|e| {
                warn!("{name} hook failed: {e}");
            })?;
        }
        Ok(())
    }

    /// Fires the response hooks for `ctx.endpoint_id`: endpoint-specific first, then global.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first hook error.
    pub async fn call_response(&self, ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        let endpoint_id = ctx.endpoint_id;
        for (name, hook) in self.scoped(HookKind::Response, endpoint_id) {
            debug!("Calling {name}");
            hook.on_response(ctx).await.inspect_err(|e| {
                warn!("{name} hook failed: {e}");
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut endpoints: Vec<_> = self
            .endpoints
            .iter()
            .map(|(id, hooks)| (id.as_str(), hooks.len()))
            .collect();
        endpoints.sort_unstable();
        f.debug_struct("HookRegistry")
            .field("global", &self.global.len())
            .field("endpoints", &endpoints)
            .finish()
    }
}

/// The caller's hook followed by the registry hooks.
///
/// Error hooks only go to the caller's hook; the registry has no error names.
#[derive(Clone)]
pub struct CombinedHooks {
    caller: Option<Arc<dyn FetchHook>>,
    registry: Arc<HookRegistry>,
}

impl CombinedHooks {
    /// Combines an optional caller hook with the registry.
    pub fn new(caller: Option<Arc<dyn FetchHook>>, registry: Arc<HookRegistry>) -> Self {
        Self { caller, registry }
    }
}

impl fmt::Debug for CombinedHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedHooks")
            .field("caller", &self.caller.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

#[async_trait]
impl FetchHook for CombinedHooks {
    async fn on_request(&self, ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
        if let Some(caller) = &self.caller {
            caller.on_request(ctx).await?;
        }
        self.registry.call_request(ctx).await
    }

    async fn on_response(&self, ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        if let Some(caller) = &self.caller {
            caller.on_response(ctx).await?;
        }
        self.registry.call_response(ctx).await
    }

    async fn on_request_error(&self, ctx: &RequestErrorContext<'_>) -> Result<(), HookError> {
        match &self.caller {
            Some(caller) => caller.on_request_error(ctx).await,
            None => Ok(()),
        }
    }

    async fn on_response_error(&self, ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        match &self.caller {
            Some(caller) => caller.on_response_error(ctx).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::sync::Mutex;

    use super::*;

    /// Records its label into a shared log on every request and response.
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FetchHook for Recorder {
        async fn on_request(&self, _ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
            self.log.lock().unwrap().push(format!("request:{}", self.label));
            Ok(())
        }
    }

    struct Deny;

    #[async_trait]
    impl FetchHook for Deny {
        async fn on_request(&self, _ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
            Err(HookError::forbidden("denied"))
        }
    }

    fn request() -> reqwest::Request {
        reqwest::Request::new(
            Method::GET,
            Url::parse("https://api.example.com/users").unwrap(),
        )
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(
            HookName::global(HookKind::Request).to_string(),
            "api-party:request"
        );
        assert_eq!(
            HookName::endpoint(HookKind::Response, "users").to_string(),
            "api-party:response:users"
        );
    }

    #[tokio::test]
    async fn test_caller_then_endpoint_then_global() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = |label| Recorder {
            label,
            log: Arc::clone(&log),
        };

        let registry = HookRegistry::new()
            .with_hook(recorder("global"))
            .with_endpoint_hook("users", recorder("endpoint"))
            .with_endpoint_hook("other", recorder("other"));
        let combined = CombinedHooks::new(Some(Arc::new(recorder("caller"))), Arc::new(registry));

        let mut req = request();
        let mut ctx = RequestContext {
            endpoint_id: "users",
            request: &mut req,
            event: None,
        };
        combined.on_request(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["request:caller", "request:endpoint", "request:global"]
        );
    }

    #[tokio::test]
    async fn test_first_error_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new()
            .with_endpoint_hook("users", Deny)
            .with_hook(Recorder {
                label: "global",
                log: Arc::clone(&log),
            });

        let mut req = request();
        let mut ctx = RequestContext {
            endpoint_id: "users",
            request: &mut req,
            event: None,
        };
        let err = registry.call_request(&mut ctx).await.unwrap_err();

        assert_eq!(err, HookError::forbidden("denied"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_registry_len() {
        let registry = HookRegistry::new()
            .with_hook(Deny)
            .with_endpoint_hook("a", Deny)
            .with_endpoint_hook("a", Deny);
        assert_eq!(registry.len(), 3);
        assert!(HookRegistry::new().is_empty());
    }
}
