use reqwest::StatusCode;

/// Errors raised inside the cache.
///
/// Only [`CacheError::InvalidConfig`], [`CacheError::Tls`] and client build
/// failures ever reach a caller, and only from the constructors. Every other
/// variant is logged and swallowed at the boundary of the public operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status code {0}")]
    Status(StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}
