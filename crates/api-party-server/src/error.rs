//! Error types for the proxy server.

use api_party_client::HookError;
use api_party_common::ConfigError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Error returned by the proxy handler; converts directly to an HTTP response.
///
/// The body is JSON: `{"statusCode": 404, "statusMessage": "..."}`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// Unknown endpoint id.
    #[error("{0}")]
    NotFound(String),

    /// Disallowed path or base URL override.
    #[error("{0}")]
    BadRequest(String),

    /// The endpoint configuration cannot produce a valid upstream request.
    #[error("{0}")]
    Configuration(String),

    /// A hook rejected the request with its own status.
    #[error("{0}")]
    Hook(HookError),

    /// Forwarding failed.
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl ProxyError {
    /// The response status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Hook(hook) => hook.status().unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    status_message: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            status_code: status.as_u16(),
            status_message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for ProxyError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownEndpoint(_) => Self::NotFound(err.to_string()),
            other => Self::Configuration(other.to_string()),
        }
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// I/O error (reading the config file, binding the listener).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid endpoint configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The configured origin is not an absolute URL.
    #[error("Invalid origin: {0}")]
    Origin(#[from] url::ParseError),

    /// The upstream HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using `ServerError`.
pub type Result<T> = std::result::Result<T, ServerError>;
