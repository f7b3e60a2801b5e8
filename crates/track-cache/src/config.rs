use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::CacheError;

const DEFAULT_USER_AGENT: &str = concat!("track-cache/", env!("CARGO_PKG_VERSION"));

/// Name of the manifest document inside the cache directory
pub const MANIFEST_FILE_NAME: &str = "index-v1.json";

/// Number of entries the manifest retains
pub const MAX_ENTRIES: usize = 200;

/// Configuration for the on-disk audio cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the manifest and every cached file
    pub cache_dir: PathBuf,

    /// File name of the manifest inside `cache_dir`
    pub manifest_file_name: String,

    /// Maximum number of manifest entries, most recently cached first
    pub max_entries: usize,

    /// Delete the files of entries dropped by the entry cap
    pub prune_truncated_files: bool,

    /// HTTP settings used by the default downloader
    pub downloader: DownloaderConfig,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            manifest_file_name: MANIFEST_FILE_NAME.to_owned(),
            max_entries: MAX_ENTRIES,
            prune_truncated_files: true,
            downloader: DownloaderConfig::default(),
        }
    }

    pub fn builder(cache_dir: impl Into<PathBuf>) -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new(cache_dir)
    }

    /// Full path of the manifest document
    pub fn manifest_path(&self) -> PathBuf {
        self.cache_dir.join(&self.manifest_file_name)
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache directory must not be empty".to_string(),
            ));
        }
        if self.manifest_file_name.is_empty() || self.manifest_file_name.contains(['/', '\\']) {
            return Err(CacheError::InvalidConfig(format!(
                "manifest file name must be a plain file name, got '{}'",
                self.manifest_file_name
            )));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP options for fetching remote tracks
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for the entire HTTP request, zero disables it
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy URL routed for every scheme (optional)
    pub proxy: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            // Long tracks over slow links outlive any sane overall deadline
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("audio/*,application/octet-stream;q=0.9,*/*;q=0.8"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::new("/tmp/tracks");
        assert_eq!(config.max_entries, MAX_ENTRIES);
        assert_eq!(config.manifest_path(), PathBuf::from("/tmp/tracks/index-v1.json"));
        assert!(config.prune_truncated_files);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CacheConfig::new("").validate().is_err());

        let mut config = CacheConfig::new("/tmp/tracks");
        config.max_entries = 0;
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidConfig(_))
        ));

        let mut config = CacheConfig::new("/tmp/tracks");
        config.manifest_file_name = "nested/index.json".to_string();
        assert!(config.validate().is_err());
    }
}
