//! HTTP server hosting the proxy routes.

use axum::Router;
use axum::routing::any;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::Result;
use crate::proxy::{ProxyState, proxy_handler};

/// Builds the router.
///
/// Every method is accepted on `/api/<base path>/<endpoint id>/proxy` and on any
/// path below it.
pub fn router(state: ProxyState) -> Router {
    let base = state.config().proxy_base("{endpoint_id}");
    let nested = format!("{base}/{{*path}}");

    Router::new()
        .route(&base, any(proxy_handler))
        .route(&nested, any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the proxy routes on `listener` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(listener: TcpListener, state: ProxyState) -> Result<()> {
    let endpoints = state.config().endpoints.len();
    info!(
        addr = %listener.local_addr()?,
        endpoints,
        "Proxy listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Proxy shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, initiating graceful shutdown"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
    }
}
