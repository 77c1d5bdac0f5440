//! Request-level value types: cache modes, bodies and retry pass-through options.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};

/// Status codes retried by default.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Named cache modes understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum CacheMode {
    /// Use the transport's normal caching behaviour.
    Default,
    /// Never read from or write to a cache.
    NoStore,
    /// Skip the cache for the request but update it with the response.
    Reload,
    /// Revalidate with the server before using a cached response.
    NoCache,
    /// Prefer a cached response regardless of its age.
    ForceCache,
    /// Only answer from a cache.
    OnlyIfCached,
}

impl CacheMode {
    /// The `Cache-Control` request directive expressing this mode, if any.
    ///
    /// Modes that only affect a client-side cache have no request directive.
    pub const fn request_directive(self) -> Option<&'static str> {
        match self {
            Self::NoStore => Some("no-store"),
            Self::NoCache | Self::Reload => Some("no-cache"),
            Self::Default | Self::ForceCache | Self::OnlyIfCached => None,
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::NoStore => write!(f, "no-store"),
            Self::Reload => write!(f, "reload"),
            Self::NoCache => write!(f, "no-cache"),
            Self::ForceCache => write!(f, "force-cache"),
            Self::OnlyIfCached => write!(f, "only-if-cached"),
        }
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "no-store" => Ok(Self::NoStore),
            "reload" => Ok(Self::Reload),
            "no-cache" => Ok(Self::NoCache),
            "force-cache" => Ok(Self::ForceCache),
            "only-if-cached" => Ok(Self::OnlyIfCached),
            _ => Err(format!("Unknown cache mode: {s}")),
        }
    }
}

/// Cache option as accepted from callers: a named mode or the boolean shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheOption {
    /// `true` means [`CacheMode::Default`], `false` means [`CacheMode::NoStore`].
    Enabled(bool),
    /// A named mode, passed through unchanged.
    Mode(CacheMode),
}

impl CacheOption {
    /// Normalizes the shorthand into a named mode.
    pub const fn normalize(self) -> CacheMode {
        match self {
            Self::Enabled(true) => CacheMode::Default,
            Self::Enabled(false) => CacheMode::NoStore,
            Self::Mode(mode) => mode,
        }
    }
}

impl From<bool> for CacheOption {
    fn from(enabled: bool) -> Self {
        Self::Enabled(enabled)
    }
}

impl From<CacheMode> for CacheOption {
    fn from(mode: CacheMode) -> Self {
        Self::Mode(mode)
    }
}

/// A single multipart form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    /// A plain text field.
    Text(String),
    /// A file upload.
    File {
        /// File name reported to the server.
        file_name: String,
        /// MIME type of the content.
        content_type: Option<String>,
        /// Raw file content.
        content: Bytes,
    },
}

/// Multipart form data.
///
/// Form payloads are not stably hashable and never contribute to cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    /// Fields in insertion order.
    pub fields: Vec<(String, FormValue)>,
}

impl FormData {
    /// Creates an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), FormValue::Text(value.into())));
        self
    }

    /// Appends a file field.
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        self.fields.push((
            name.into(),
            FormValue::File {
                file_name: file_name.into(),
                content_type,
                content: content.into(),
            },
        ));
        self
    }
}

/// Outbound request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `content-type: application/json`.
    Json(serde_json::Value),
    /// Sent as-is.
    Text(String),
    /// Sent as-is.
    Bytes(Bytes),
    /// Sent as `multipart/form-data`.
    Form(FormData),
}

impl RequestBody {
    /// Returns `true` for multipart form bodies.
    pub const fn is_form_data(&self) -> bool {
        matches!(self, Self::Form(_))
    }

    /// A stable JSON rendering used for cache keys, or `None` for form data.
    pub fn hash_value(&self) -> Option<serde_json::Value> {
        match self {
            Self::Json(value) => Some(value.clone()),
            Self::Text(text) => Some(serde_json::Value::String(text.clone())),
            Self::Bytes(bytes) => Some(serde_json::Value::String(STANDARD.encode(bytes))),
            Self::Form(_) => None,
        }
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<FormData> for RequestBody {
    fn from(form: FormData) -> Self {
        Self::Form(form)
    }
}

/// Retry settings forwarded verbatim to the transport.
///
/// Unset fields fall back to the transport defaults: one retry for methods without a
/// payload, none otherwise, no delay, and [`DEFAULT_RETRY_STATUS_CODES`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOptions {
    /// Number of retries after the first attempt.
    pub retry: Option<u32>,
    /// Delay between attempts.
    pub retry_delay: Option<Duration>,
    /// Response statuses that trigger a retry.
    pub retry_status_codes: Option<Vec<u16>>,
}

impl RetryOptions {
    /// Retries to perform for `method`.
    pub fn retries_for(&self, method: &Method) -> u32 {
        self.retry.unwrap_or_else(|| {
            let has_payload = matches!(
                *method,
                Method::POST | Method::PUT | Method::PATCH | Method::DELETE
            );
            u32::from(!has_payload)
        })
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.retry_delay.unwrap_or_default()
    }

    /// Statuses that trigger a retry.
    pub fn status_codes(&self) -> Vec<u16> {
        self.retry_status_codes
            .clone()
            .unwrap_or_else(|| DEFAULT_RETRY_STATUS_CODES.to_vec())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn test_boolean_shorthand_normalizes() {
        assert_eq!(CacheOption::from(true).normalize(), CacheMode::Default);
        assert_eq!(CacheOption::from(false).normalize(), CacheMode::NoStore);
    }

    #[test]
    fn test_named_mode_passes_through() {
        for mode in [
            CacheMode::Default,
            CacheMode::NoStore,
            CacheMode::Reload,
            CacheMode::NoCache,
            CacheMode::ForceCache,
            CacheMode::OnlyIfCached,
        ] {
            assert_eq!(CacheOption::from(mode).normalize(), mode);
            assert_eq!(mode.to_string().parse::<CacheMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_cache_option_deserializes_both_forms() {
        let named: CacheOption = serde_json::from_str("\"force-cache\"").unwrap();
        assert_eq!(named.normalize(), CacheMode::ForceCache);

        let flag: CacheOption = serde_json::from_str("false").unwrap();
        assert_eq!(flag.normalize(), CacheMode::NoStore);
    }

    #[test]
    fn test_request_directive() {
        assert_eq!(CacheMode::NoStore.request_directive(), Some("no-store"));
        assert_eq!(CacheMode::Reload.request_directive(), Some("no-cache"));
        assert_eq!(CacheMode::Default.request_directive(), None);
    }

    #[test]
    fn test_form_data_has_no_hash_value() {
        let body = RequestBody::from(FormData::new().text("name", "value"));
        assert!(body.is_form_data());
        assert!(body.hash_value().is_none());

        let body = RequestBody::from(serde_json::json!({"a": 1}));
        assert_eq!(body.hash_value(), Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_default_retries_depend_on_method() {
        let options = RetryOptions::default();
        assert_eq!(options.retries_for(&Method::GET), 1);
        assert_eq!(options.retries_for(&Method::POST), 0);
        assert_eq!(options.delay(), Duration::ZERO);
        assert_eq!(options.status_codes(), DEFAULT_RETRY_STATUS_CODES.to_vec());

        let options = RetryOptions {
            retry: Some(3),
            ..RetryOptions::default()
        };
        assert_eq!(options.retries_for(&Method::POST), 3);
    }
}
