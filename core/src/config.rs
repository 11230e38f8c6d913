//! Client configuration.
//!
//! Hosts pass configuration as JSON (the FFI layer forwards it verbatim).
//! Every field is optional and falls back to the defaults below.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::http::CachePolicy;

pub const DEFAULT_BASE_URL: &str = "https://cataas.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed client config: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("base_url must not be empty")]
    EmptyBaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub image_timeout_secs: u64,
    pub cache_policy: CachePolicy,
    /// `None` keeps every downloaded image for the life of the client.
    pub image_cache_max_bytes: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            image_timeout_secs: 60,
            cache_policy: CachePolicy::ReloadIgnoringCache,
            image_cache_max_bytes: None,
        }
    }
}

impl ClientConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(raw)?;
        if config.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }
}
