//! Error types for the client library.

use api_party_common::{ConfigError, PathParamError};
use bytes::Bytes;
use http::StatusCode;
use reqwest_retry::RetryError;
use thiserror::Error;

/// Error raised by a lifecycle hook.
///
/// An [`HookError::Http`] carries a status meant to reach the caller unchanged, for
/// example a 403 from an authorization hook. [`HookError::Failed`] is an ordinary
/// failure with no status of its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HookError {
    /// Short-circuit with a specific HTTP status.
    #[error("{message}")]
    Http {
        /// Status to respond with.
        status: StatusCode,
        /// Message shown to the caller.
        message: String,
    },

    /// The hook failed without choosing a status.
    #[error("Hook failed: {0}")]
    Failed(String),
}

impl HookError {
    /// Creates a hook error carrying `status`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for a `403 Forbidden` hook error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// Creates a hook error without a status.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// The status carried by this error, if any.
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Failed(_) => None,
        }
    }
}

/// Errors that can occur when resolving or executing an API call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Unknown endpoint id or unusable configuration.
    ///
    /// Always fatal to the call and never retried.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A direct call was requested while client calls are disabled.
    ///
    /// Raised before any network activity.
    #[error(
        "Client-side API requests are disabled. Set `client = true` in the configuration to enable them."
    )]
    PolicyError,

    /// The path template could not be resolved.
    #[error("Validation error: {0}")]
    ValidationError(#[from] PathParamError),

    /// A lifecycle hook short-circuited the call.
    #[error("Hook error: {0}")]
    HookError(#[from] HookError),

    /// The upstream API answered with a non-success status.
    ///
    /// The status and raw body are passed through as received.
    #[error("Upstream responded with {status}")]
    UpstreamError {
        /// Response status.
        status: StatusCode,
        /// Raw response body.
        body: Bytes,
    },

    /// Network or HTTP request failure.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Middleware layer error.
    ///
    /// Errors from the retry layer that are not hook errors.
    #[error("Middleware error: {0}")]
    MiddlewareError(anyhow::Error),

    /// JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The call was cancelled through its abort signal.
    #[error("Request aborted")]
    Aborted,
}

impl ClientError {
    /// Check if this is a policy error.
    pub const fn is_policy_error(&self) -> bool {
        matches!(self, Self::PolicyError)
    }

    /// Check if the call was aborted.
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// The HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UpstreamError { status, .. } => Some(*status),
            Self::HookError(hook) => hook.status(),
            Self::NetworkError(e) => e.status(),
            _ => None,
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

impl From<reqwest_middleware::Error> for ClientError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => Self::NetworkError(e),
            reqwest_middleware::Error::Middleware(e) => match e.downcast::<HookError>() {
                Ok(hook) => Self::HookError(hook),
                Err(other) => match other.downcast::<RetryError>() {
                    // The retry layer wraps every error it passes through.
                    Ok(RetryError::Error(inner) | RetryError::WithRetries { err: inner, .. }) => {
                        Self::from(inner)
                    }
                    Err(other) => Self::MiddlewareError(other),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn test_hook_error_status() {
        assert_eq!(
            HookError::forbidden("nope").status(),
            Some(StatusCode::FORBIDDEN)
        );
        assert_eq!(HookError::failed("boom").status(), None);
        assert_eq!(HookError::forbidden("nope").to_string(), "nope");
    }

    #[test]
    fn test_middleware_error_unwraps_hook_error() {
        let err = reqwest_middleware::Error::middleware(HookError::forbidden("denied"));
        let client_err = ClientError::from(err);

        assert!(matches!(client_err, ClientError::HookError(_)));
        assert_eq!(client_err.status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_retry_wrapped_hook_error_is_recovered() {
        let wrapped = reqwest_middleware::Error::Middleware(
            RetryError::Error(reqwest_middleware::Error::middleware(HookError::forbidden(
                "denied",
            )))
            .into(),
        );
        let client_err = ClientError::from(wrapped);
        assert!(matches!(client_err, ClientError::HookError(HookError::Http { .. })));
        assert_eq!(client_err.status(), Some(StatusCode::FORBIDDEN));

        let exhausted = reqwest_middleware::Error::Middleware(
            RetryError::WithRetries {
                retries: 2,
                err: reqwest_middleware::Error::middleware(HookError::failed("boom")),
            }
            .into(),
        );
        assert!(matches!(
            ClientError::from(exhausted),
            ClientError::HookError(HookError::Failed(_))
        ));
    }

    #[test]
    fn test_config_error_maps_to_configuration_error() {
        let err = ClientError::from(ConfigError::UnknownEndpoint("nope".to_string()));
        assert!(matches!(err, ClientError::ConfigurationError(ref m) if m.contains("nope")));
    }

    #[test]
    fn test_policy_error() {
        assert!(ClientError::PolicyError.is_policy_error());
        assert!(!ClientError::Aborted.is_policy_error());
        assert!(ClientError::Aborted.is_aborted());
    }
}
