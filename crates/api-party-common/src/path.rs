//! Path templates and URL joining.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

// The pattern is a literal, so compiling it cannot fail.
#[allow(clippy::unwrap_used)]
static PATH_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}/]+)\}").unwrap());

/// A `{name}` segment in a path template had no replacement value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Missing path parameter \"{name}\" for path \"{path}\"")]
pub struct PathParamError {
    /// Name of the unresolved segment.
    pub name: String,
    /// The template that was being resolved.
    pub path: String,
}

/// Substitutes every `{name}` segment of `path` with its percent-encoded value.
///
/// Parameters that do not appear in the template are ignored.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use api_party_common::resolve_path_params;
///
/// let params = BTreeMap::from([("id".to_string(), "42".to_string())]);
/// assert_eq!(resolve_path_params("/users/{id}", &params).unwrap(), "/users/42");
/// ```
///
/// # Errors
///
/// Returns [`PathParamError`] for the first segment without a value.
pub fn resolve_path_params(
    path: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, PathParamError> {
    let mut resolved = String::with_capacity(path.len());
    let mut last = 0;

    for captures in PATH_PARAM.captures_iter(path) {
        let (Some(segment), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = params.get(name.as_str()).ok_or_else(|| PathParamError {
            name: name.as_str().to_string(),
            path: path.to_string(),
        })?;
        resolved.push_str(&path[last..segment.start()]);
        resolved.push_str(&urlencoding::encode(value));
        last = segment.end();
    }

    resolved.push_str(&path[last..]);
    Ok(resolved)
}

/// Joins URL segments with exactly one `/` between them.
///
/// Empty segments and bare `/` segments are skipped.
///
/// ```
/// use api_party_common::join_url;
///
/// assert_eq!(join_url("/api", ["__api_party", "users", "proxy"]), "/api/__api_party/users/proxy");
/// assert_eq!(join_url("https://api.example.com/", ["/users"]), "https://api.example.com/users");
/// ```
pub fn join_url<'a>(base: &str, segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut url = base.to_string();

    for segment in segments {
        if segment.is_empty() || segment == "/" {
            continue;
        }
        if url.is_empty() {
            url = segment.to_string();
            continue;
        }
        let head = url.trim_end_matches('/');
        let tail = segment.trim_start_matches('/');
        url = format!("{head}/{tail}");
    }

    url
}
