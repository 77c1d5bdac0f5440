//! Middleware stack of the transport: hooks inside retries.
//!
//! Each call gets its own [`ClientWithMiddleware`] over a shared [`reqwest::Client`],
//! since hooks and retry settings are per call. The hook layer sits inside the retry
//! layer so that hooks fire once per attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Extensions;
use http::request::Parts;
use log::{debug, warn};
use reqwest::{Request, Response};
use reqwest_middleware::{ClientWithMiddleware, Middleware, Next};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{
    Jitter, RetryTransientMiddleware, Retryable, RetryableStrategy, default_on_request_failure,
};

use crate::hooks::{FetchHook, RequestContext, RequestErrorContext, ResponseContext};

/// Runs [`FetchHook`] callbacks around each attempt.
pub struct HookMiddleware {
    endpoint_id: String,
    hooks: Arc<dyn FetchHook>,
    event: Option<Arc<Parts>>,
}

impl HookMiddleware {
    /// Creates the middleware for one call.
    ///
    /// `event` is the inbound request on the proxy path, exposed to hooks.
    pub fn new(
        endpoint_id: impl Into<String>,
        hooks: Arc<dyn FetchHook>,
        event: Option<Arc<Parts>>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            hooks,
            event,
        }
    }
}

#[async_trait]
impl Middleware for HookMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let event = self.event.as_deref();

        let mut ctx = RequestContext {
            endpoint_id: &self.endpoint_id,
            request: &mut req,
            event,
        };
        self.hooks
            .on_request(&mut ctx)
            .await
            .map_err(reqwest_middleware::Error::middleware)?;

        let method = req.method().clone();
        let url = req.url().clone();

        match next.run(req, extensions).await {
            Ok(mut response) => {
                let mut ctx = ResponseContext {
                    endpoint_id: &self.endpoint_id,
                    method: &method,
                    url: &url,
                    response: &mut response,
                    event,
                };
                self.hooks
                    .on_response(&mut ctx)
                    .await
                    .map_err(reqwest_middleware::Error::middleware)?;
                if ctx.response.status().is_client_error() || ctx.response.status().is_server_error()
                {
                    self.hooks
                        .on_response_error(&mut ctx)
                        .await
                        .map_err(reqwest_middleware::Error::middleware)?;
                }
                Ok(response)
            }
            Err(error) => {
                let ctx = RequestErrorContext {
                    endpoint_id: &self.endpoint_id,
                    method: &method,
                    url: &url,
                    error: &error,
                    event,
                };
                if let Err(e) = self.hooks.on_request_error(&ctx).await {
                    warn!("Request error hook failed for {method} {url}: {e}");
                }
                Err(error)
            }
        }
    }
}

/// Retries on a fixed set of response statuses.
///
/// Transport failures fall back to the default classification; hook errors are fatal.
#[derive(Debug, Clone)]
pub struct StatusCodeRetry {
    codes: Vec<u16>,
}

impl StatusCodeRetry {
    /// Retries responses whose status is in `codes`.
    pub const fn new(codes: Vec<u16>) -> Self {
        Self { codes }
    }
}

impl RetryableStrategy for StatusCodeRetry {
    fn handle(&self, res: &reqwest_middleware::Result<Response>) -> Option<Retryable> {
        match res {
            Ok(response) if self.codes.contains(&response.status().as_u16()) => {
                debug!("Retrying on status {}", response.status());
                Some(Retryable::Transient)
            }
            Ok(_) => None,
            Err(error) => default_on_request_failure(error),
        }
    }
}

/// Retry settings resolved for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Constant delay between attempts.
    pub delay: Duration,
    /// Statuses that trigger a retry.
    pub status_codes: Vec<u16>,
}

/// Builds the per-call client: retries (if any) around hooks around `client`.
pub fn build_transport(
    client: &reqwest::Client,
    hooks: HookMiddleware,
    retry: Option<RetryPlan>,
) -> ClientWithMiddleware {
    let mut builder = reqwest_middleware::ClientBuilder::new(client.clone());
    if let Some(plan) = retry.filter(|plan| plan.retries > 0) {
        let policy = ExponentialBackoff::builder()
            .retry_bounds(plan.delay, plan.delay)
            .jitter(Jitter::None)
            .build_with_max_retries(plan.retries);
        builder = builder.with(RetryTransientMiddleware::new_with_policy_and_strategy(
            policy,
            StatusCodeRetry::new(plan.status_codes),
        ));
    }
    builder.with(hooks).build()
}
