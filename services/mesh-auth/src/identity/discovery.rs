//! Resolution of plugin base URLs.

use async_trait::async_trait;
use url::Url;

use crate::config::Config;
use crate::error::KeyResolutionError;

/// Resolves the base URL at which a plugin serves its API.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Returns the base URL for `plugin_id`.
    async fn base_url(&self, plugin_id: &str) -> Result<Url, KeyResolutionError>;
}

/// Discovery for plugins co-hosted under one backend, at `{base}/api/{plugin_id}`.
#[derive(Debug, Clone)]
pub struct HostDiscovery {
    base: Url,
}

impl HostDiscovery {
    /// Creates discovery rooted at `base`.
    #[must_use]
    pub const fn new(base: Url) -> Self {
        Self { base }
    }

    /// Creates discovery from the configured backend base URL.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.discovery_base_url.clone())
    }
}

#[async_trait]
impl Discovery for HostDiscovery {
    async fn base_url(&self, plugin_id: &str) -> Result<Url, KeyResolutionError> {
        append_path(&self.base, &["api", plugin_id]).map_err(|reason| {
            KeyResolutionError::Discovery {
                plugin_id: plugin_id.to_string(),
                reason,
            }
        })
    }
}

/// Appends path segments to `base`, ignoring any trailing slash.
pub(crate) fn append_path(base: &Url, segments: &[&str]) -> Result<Url, String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| format!("{base} cannot be used as a base URL"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
