//! # Downloader
//!
//! The transfer primitive behind `cache_url`: fetch a URL into a local file
//! while reporting progress. [`HttpDownloader`] is the production
//! implementation; tests and embedders can plug in their own.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode, Url};
use rustls::ClientConfig;
use rustls_platform_verifier::BuilderVerifierExt;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

use crate::{CacheError, DownloaderConfig};

/// Bytes received so far for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`, zero while the size is unknown
    pub fn ratio(&self) -> f64 {
        match self.total_bytes {
            Some(total) if total > 0 => (self.bytes_written as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }
}

/// Callback invoked for every chunk written
pub type ProgressFn<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

/// A resumable transfer from a remote URL to a local file
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes in `dest`
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, CacheError>;
}

#[async_trait]
impl<D: Downloader + ?Sized> Downloader for Arc<D> {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, CacheError> {
        (**self).download(url, dest, on_progress).await
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, CacheError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| CacheError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| CacheError::Tls(e.to_string()))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_url) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| CacheError::InvalidConfig(format!("Invalid proxy URL: {e}")))?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_url, "Using configured proxy for downloads");
    }

    client_builder.build().map_err(CacheError::from)
}

/// Path of the in-progress file for `dest`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Temp file a single transfer writes into.
///
/// The shared `<dest>.part` belongs to at most one transfer at a time and is
/// kept on failure so a later attempt can resume it. A transfer that finds it
/// taken writes a private `<dest>.part.<n>` from scratch instead.
struct PartClaim<'a> {
    in_flight: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
    resumable: bool,
}

impl Drop for PartClaim<'_> {
    fn drop(&mut self) {
        if self.resumable {
            self.in_flight.lock().remove(&self.path);
        }
    }
}

/// HTTP downloader with ranged resume of interrupted transfers.
///
/// Data lands in a temp file next to `dest` and is renamed onto `dest` once
/// the body has been received completely. A leftover `.part` file no other
/// transfer is writing is resumed with a `Range` request.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    next_temp: Arc<AtomicU64>,
}

impl HttpDownloader {
    pub fn new(config: &DownloaderConfig) -> Result<Self, CacheError> {
        Ok(Self::with_client(create_client(config)?))
    }

    /// Use an already configured client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            next_temp: Arc::new(AtomicU64::new(0)),
        }
    }

    fn claim(&self, dest: &Path) -> PartClaim<'_> {
        let part = partial_path(dest);
        if self.in_flight.lock().insert(part.clone()) {
            return PartClaim {
                in_flight: &self.in_flight,
                path: part,
                resumable: true,
            };
        }

        let n = self.next_temp.fetch_add(1, Ordering::Relaxed);
        let mut name = part.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{n}"));
        debug!(path = ?part, "Partial file busy, using a private temp file");
        PartClaim {
            in_flight: &self.in_flight,
            path: part.with_file_name(name),
            resumable: false,
        }
    }

    async fn transfer(
        &self,
        url: Url,
        claim: &PartClaim<'_>,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, CacheError> {
        let part_path = &claim.path;

        let resume_from = if claim.resumable {
            match fs::metadata(part_path).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => 0,
            }
        } else {
            0
        };

        let mut request = self.client.get(url.clone());
        if resume_from > 0 {
            debug!(url = %url, offset = resume_from, "Resuming partial download");
            request = request.header(reqwest::header::RANGE, format!("bytes={resume_from}-"));
        }

        let response = request.send().await?;
        let status = response.status();

        let offset = if status == StatusCode::PARTIAL_CONTENT && resume_from > 0 {
            resume_from
        } else if status.is_success() {
            0
        } else {
            if status == StatusCode::RANGE_NOT_SATISFIABLE {
                // The partial file no longer matches the resource
                let _ = fs::remove_file(part_path).await;
            }
            return Err(CacheError::Status(status));
        };

        let total_bytes = response.content_length().map(|len| len + offset);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(offset > 0)
            .truncate(offset == 0)
            .open(part_path)
            .await?;
        let mut writer = BufWriter::new(file);

        let mut bytes_written = offset;
        on_progress(TransferProgress {
            bytes_written,
            total_bytes,
        });

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
            on_progress(TransferProgress {
                bytes_written,
                total_bytes,
            });
        }

        writer.flush().await?;
        drop(writer);

        fs::rename(part_path, dest).await?;
        Ok(bytes_written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    #[instrument(skip(self, on_progress), level = "debug")]
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, CacheError> {
        let parsed = url
            .parse::<Url>()
            .map_err(|_| CacheError::InvalidUrl(url.to_string()))?;

        let claim = self.claim(dest);
        let result = self.transfer(parsed, &claim, dest, on_progress).await;

        match &result {
            Ok(bytes) => info!(url, path = ?dest, bytes, "Download complete"),
            // Private temp files cannot be resumed, drop them
            Err(_) if !claim.resumable => {
                let _ = fs::remove_file(&claim.path).await;
            }
            Err(_) => {}
        }
        result
    }
}
