//! # Builder for CacheConfig
//!
//! Fluent construction of [`CacheConfig`] and its nested HTTP settings.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use track_cache::CacheConfig;
//!
//! let config = CacheConfig::builder("/var/cache/tracks")
//!     .with_max_entries(50)
//!     .with_connect_timeout(Duration::from_secs(5))
//!     .with_user_agent("MyPlayer/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .build();
//!
//! assert_eq!(config.max_entries, 50);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::HeaderValue;

use crate::CacheConfig;

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default settings rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: CacheConfig::new(cache_dir),
        }
    }

    /// Set the manifest file name inside the cache directory
    pub fn with_manifest_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.manifest_file_name = name.into();
        self
    }

    /// Set how many entries the manifest keeps
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    /// Enable or disable deleting files whose entries fall off the cap
    pub fn with_prune_truncated_files(mut self, prune: bool) -> Self {
        self.config.prune_truncated_files = prune;
        self
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.downloader.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.downloader.connect_timeout = timeout;
        self
    }

    /// Set the read timeout (maximum time between receiving data chunks)
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.downloader.read_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.downloader.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.downloader.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header, invalid names or values are ignored
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.downloader.headers.insert(name, value);
        }
        self
    }

    /// Route downloads through a proxy
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.downloader.proxy = Some(proxy_url.into());
        self
    }

    /// Build the final configuration
    pub fn build(self) -> CacheConfig {
        self.config
    }
}
