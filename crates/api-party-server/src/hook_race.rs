//! Side channel that lets hook errors preempt the forwarder's own error handling.
//!
//! The forwarding primitive turns every failure during forwarding into a 503. A hook
//! that rejects with a specific status (e.g. a 403 from an authorization hook) would
//! be flattened the same way. [`SignallingHooks`] reports such errors on a one-shot
//! channel before rethrowing them, and the handler races the forward against the
//! [`HookErrorWatcher`]: whichever settles first decides the response.

use std::sync::{Arc, Mutex};

use api_party_client::{
    FetchHook, HookError, RequestContext, RequestErrorContext, ResponseContext,
};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

/// Creates a connected signal and watcher for one request.
pub fn hook_error_channel() -> (HookErrorSignal, HookErrorWatcher) {
    let (tx, rx) = oneshot::channel();
    (
        HookErrorSignal {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        HookErrorWatcher { rx },
    )
}

/// Sending half. Only the first rejection is delivered.
#[derive(Debug, Clone)]
pub struct HookErrorSignal {
    tx: Arc<Mutex<Option<oneshot::Sender<HookError>>>>,
}

impl HookErrorSignal {
    /// Reports a hook error. Later calls are ignored.
    pub fn reject(&self, error: HookError) {
        let sender = self.tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            // The watcher may already be gone if the forward has won.
            let _ = sender.send(error);
        }
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct HookErrorWatcher {
    rx: oneshot::Receiver<HookError>,
}

impl HookErrorWatcher {
    /// Resolves with the first hook error, or `None` once every signal is dropped
    /// without one.
    pub async fn rejected(&mut self) -> Option<HookError> {
        (&mut self.rx).await.ok()
    }

    /// Takes a hook error that has already been reported.
    pub fn try_take(&mut self) -> Option<HookError> {
        self.rx.try_recv().ok()
    }
}

/// Wraps a hook so that errors carrying a status are reported on a [`HookErrorSignal`].
///
/// Errors are always rethrown, so the forwarding call still observes the failure.
/// Errors without a status are left to the forwarder's default handling.
pub struct SignallingHooks {
    inner: Arc<dyn FetchHook>,
    signal: HookErrorSignal,
}

impl SignallingHooks {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn FetchHook>, signal: HookErrorSignal) -> Self {
        Self { inner, signal }
    }

    fn observe(&self, result: Result<(), HookError>) -> Result<(), HookError> {
        if let Err(error) = &result
            && error.status().is_some()
        {
            debug!("Hook rejected the request: {error}");
            self.signal.reject(error.clone());
        }
        result
    }
}

#[async_trait]
impl FetchHook for SignallingHooks {
    async fn on_request(&self, ctx: &mut RequestContext<'_>) -> Result<(), HookError> {
        let result = self.inner.on_request(ctx).await;
        self.observe(result)
    }

    async fn on_response(&self, ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        let result = self.inner.on_response(ctx).await;
        self.observe(result)
    }

    async fn on_request_error(&self, ctx: &RequestErrorContext<'_>) -> Result<(), HookError> {
        self.inner.on_request_error(ctx).await
    }

    async fn on_response_error(&self, ctx: &mut ResponseContext<'_>) -> Result<(), HookError> {
        let result = self.inner.on_response_error(ctx).await;
        self.observe(result)
    }
}
