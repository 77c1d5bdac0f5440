//! api-party proxy server
//!
//! Serves the proxy routes for the endpoints in a TOML configuration file.

use std::net::SocketAddr;
use std::path::PathBuf;

use api_party_server::{DEFAULT_LISTEN, ProxyState, Result, ServerConfig, serve};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Credential-hiding reverse proxy for configured upstream APIs.
#[derive(Debug, Parser)]
#[command(name = "api-party-server", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "API_PARTY_CONFIG")]
    config: PathBuf,

    /// Address to listen on; overrides `listen` in the configuration file.
    #[arg(short, long, env = "API_PARTY_LISTEN")]
    listen: Option<SocketAddr>,
}

/// Initializes structured logging with tracing.
///
/// Supports two output formats via `API_PARTY_LOG_FORMAT` environment variable:
/// - `json`: Machine-readable JSON logs
/// - `pretty`: Human-readable formatted logs (default)
///
/// Log level is controlled via `RUST_LOG` environment variable.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("API_PARTY_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("api_party_server=info,api_party_client=info,tower_http=info")
    });

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = ServerConfig::load(&args.config).inspect_err(|e| {
        error!("Failed to load configuration from {}: {e}", args.config.display());
    })?;
    info!(
        "Loaded configuration with {} endpoint(s)",
        config.api_party.endpoints.len()
    );

    let listen = match args.listen.or(config.listen) {
        Some(addr) => addr.to_string(),
        None => DEFAULT_LISTEN.to_string(),
    };
    let listener = TcpListener::bind(listen.as_str()).await.inspect_err(|e| {
        error!("Failed to bind {listen}: {e}");
    })?;

    let origin = config.origin_url()?;
    let mut state = ProxyState::new(config.api_party)?;
    if let Some(origin) = origin {
        state = state.with_origin(origin);
    }
    serve(listener, state).await
}
