//! # Track Cache
//!
//! On-device cache for remotely streamed audio tracks. Tracks are fetched
//! once, stored under a cache directory and resolved to their local path on
//! later playback, with a bounded, crash-safe manifest recording what is
//! cached.
//!
//! ## Features
//!
//! - Deterministic file naming from the track URL
//! - Serialized manifest mutations with most-recent-first ordering
//! - Resumable HTTP downloads with progress reporting
//! - Completion and progress listeners for UI observers
//! - A pass-through implementation for hosts without local storage
//!
//! ```no_run
//! # async fn demo() -> Result<(), track_cache::CacheError> {
//! use track_cache::{AudioCache, CacheConfig, TrackMetadata};
//!
//! let cache = AudioCache::open(CacheConfig::new("/tmp/audio-cache")).await?;
//! let url = "https://cdn.example.com/tracks/42.mp3";
//!
//! cache
//!     .cache_url(url, Some(TrackMetadata::new("42").with_title("Song")))
//!     .await;
//! let playable = cache.resolve_url(url, None).await;
//! # let _ = playable;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod manifest;
pub mod media_cache;
pub mod path;

pub use builder::CacheConfigBuilder;
pub use cache::{AudioCache, CacheStats};
pub use config::{CacheConfig, DownloaderConfig, MANIFEST_FILE_NAME, MAX_ENTRIES};
pub use error::CacheError;
pub use events::{AudioCacheProgress, Subscription};
pub use media_cache::{MediaCache, PassthroughCache};

// Re-export transfer primitives
pub use downloader::{Downloader, HttpDownloader, TransferProgress, create_client};

// Re-export manifest types
pub use manifest::{CacheEntry, CachedMeta, Manifest, TrackMetadata};
