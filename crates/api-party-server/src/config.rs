//! Server configuration.
//!
//! Loaded from a TOML file. The endpoint mapping sits at the top level alongside the
//! listen address.
//!
//! ## Example Configuration
//!
//! ```toml
//! listen = "0.0.0.0:3000"
//! origin = "http://localhost:3000"
//! client = false
//!
//! [server]
//! base_path = "__api_party"
//!
//! [endpoints.jsonPlaceholder]
//! url = "https://jsonplaceholder.typicode.com"
//! token = "secret"
//! allowed_urls = ["https://staging.jsonplaceholder.typicode.com"]
//!
//! [endpoints.jsonPlaceholder.headers]
//! x-client = "api-party"
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use api_party_common::ApiPartyConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// Address used when neither the command line nor the file sets one.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

/// Server configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    /// Origin that origin-relative endpoint URLs such as `/api` resolve against.
    #[serde(default)]
    pub origin: Option<String>,

    /// Endpoints and routing policy.
    #[serde(flatten)]
    pub api_party: ApiPartyConfig,
}

impl ServerConfig {
    /// Loads and validates the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - Deserialization fails
    /// - An endpoint is invalid
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or an endpoint is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.api_party.validate()?;
        config.origin_url()?;
        Ok(config)
    }

    /// The parsed `origin`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Origin`](crate::ServerError::Origin) if `origin` is not an absolute URL.
    pub fn origin_url(&self) -> Result<Option<Url>> {
        Ok(self.origin.as_deref().map(Url::parse).transpose()?)
    }
}
