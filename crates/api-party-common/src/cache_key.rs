//! Deterministic cache keys for reactive data bindings.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::request::RequestBody;

/// Prefix shared by every derived and explicit cache key.
pub const CACHE_KEY_PREFIX: &str = "$apiParty";

/// The request inputs a cache key is derived from.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyInput<'a> {
    /// Endpoint id.
    pub endpoint_id: &'a str,
    /// Path template before substitution.
    pub path: &'a str,
    /// Path template parameters.
    pub path_params: &'a BTreeMap<String, String>,
    /// Caller query parameters.
    pub query: &'a BTreeMap<String, String>,
    /// HTTP method, if set.
    pub method: Option<&'a Method>,
    /// Request body, if set. Form data is left out of the hash.
    pub body: Option<&'a RequestBody>,
}

impl CacheKeyInput<'_> {
    /// Derives the cache key.
    ///
    /// Equal inputs always produce the same key; object key order inside JSON bodies
    /// does not matter.
    pub fn derive(&self) -> String {
        let mut parts = vec![
            Value::from(self.endpoint_id),
            Value::from(self.path),
            string_map(self.path_params),
            string_map(self.query),
            self.method.map_or(Value::Null, |m| Value::from(m.as_str())),
        ];
        if let Some(body) = self.body {
            if let Some(value) = body.hash_value() {
                parts.push(value);
            }
        } else {
            parts.push(Value::Null);
        }

        let mut hasher = Sha256::new();
        write_canonical(&mut hasher, &Value::Array(parts));
        format!("{CACHE_KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }
}

/// Wraps a caller-supplied key so it lives in the same namespace as derived keys.
pub fn explicit_cache_key(key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{key}")
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect(),
    )
}

fn write_canonical(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            hasher.update(b"{");
            for (key, value) in sorted {
                write_canonical(hasher, &Value::from(key.as_str()));
                hasher.update(b":");
                write_canonical(hasher, value);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                write_canonical(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}
