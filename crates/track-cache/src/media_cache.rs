//! # Media Cache Capability
//!
//! The narrow interface the playback layer programs against. [`AudioCache`]
//! is the on-disk implementation; [`PassthroughCache`] serves platforms
//! without local storage by caching nothing and resolving every URL to
//! itself.

use async_trait::async_trait;

use crate::AudioCache;
use crate::events::{AudioCacheProgress, Subscription};
use crate::manifest::{CacheEntry, CachedMeta, TrackMetadata};

pub type UrlListener = Box<dyn Fn(&str) + Send + Sync>;
pub type ProgressListener = Box<dyn Fn(&AudioCacheProgress) + Send + Sync>;

/// Operations a playback layer needs from a track cache.
///
/// None of them fail: a cache that cannot do something behaves as if the
/// track were simply not cached.
#[async_trait]
pub trait MediaCache: Send + Sync {
    /// Local path for `url` when cached, otherwise `url` itself
    async fn resolve_url(&self, url: &str, metadata: Option<&TrackMetadata>) -> String;

    async fn cache_url(&self, url: &str, metadata: Option<TrackMetadata>);

    async fn evict_url(&self, url: &str);

    async fn is_cached(&self, url: &str) -> bool;

    async fn get_all_cached_tracks(&self) -> Vec<CacheEntry>;

    async fn clear_cache(&self);

    async fn get_cached_meta(&self, url: &str) -> Option<CachedMeta>;

    async fn find_cached_url_by_track_id(&self, track_id: &str) -> Option<String>;

    fn get_progress(&self, url: &str) -> Option<AudioCacheProgress>;

    fn add_listener(&self, listener: UrlListener) -> Subscription;

    fn add_progress_listener(&self, listener: ProgressListener) -> Subscription;
}

#[async_trait]
impl MediaCache for AudioCache {
    async fn resolve_url(&self, url: &str, metadata: Option<&TrackMetadata>) -> String {
        AudioCache::resolve_url(self, url, metadata).await
    }

    async fn cache_url(&self, url: &str, metadata: Option<TrackMetadata>) {
        AudioCache::cache_url(self, url, metadata).await
    }

    async fn evict_url(&self, url: &str) {
        AudioCache::evict_url(self, url).await
    }

    async fn is_cached(&self, url: &str) -> bool {
        AudioCache::is_cached(self, url).await
    }

    async fn get_all_cached_tracks(&self) -> Vec<CacheEntry> {
        AudioCache::get_all_cached_tracks(self).await
    }

    async fn clear_cache(&self) {
        AudioCache::clear_cache(self).await
    }

    async fn get_cached_meta(&self, url: &str) -> Option<CachedMeta> {
        AudioCache::get_cached_meta(self, url).await
    }

    async fn find_cached_url_by_track_id(&self, track_id: &str) -> Option<String> {
        AudioCache::find_cached_url_by_track_id(self, track_id).await
    }

    fn get_progress(&self, url: &str) -> Option<AudioCacheProgress> {
        AudioCache::get_progress(self, url)
    }

    fn add_listener(&self, listener: UrlListener) -> Subscription {
        AudioCache::add_listener(self, listener)
    }

    fn add_progress_listener(&self, listener: ProgressListener) -> Subscription {
        AudioCache::add_progress_listener(self, listener)
    }
}

/// A cache that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCache;

#[async_trait]
impl MediaCache for PassthroughCache {
    async fn resolve_url(&self, url: &str, _metadata: Option<&TrackMetadata>) -> String {
        url.to_owned()
    }

    async fn cache_url(&self, _url: &str, _metadata: Option<TrackMetadata>) {}

    async fn evict_url(&self, _url: &str) {}

    async fn is_cached(&self, _url: &str) -> bool {
        false
    }

    async fn get_all_cached_tracks(&self) -> Vec<CacheEntry> {
        Vec::new()
    }

    async fn clear_cache(&self) {}

    async fn get_cached_meta(&self, _url: &str) -> Option<CachedMeta> {
        None
    }

    async fn find_cached_url_by_track_id(&self, _track_id: &str) -> Option<String> {
        None
    }

    fn get_progress(&self, _url: &str) -> Option<AudioCacheProgress> {
        None
    }

    // Nothing is ever emitted, so there is nothing to register
    fn add_listener(&self, _listener: UrlListener) -> Subscription {
        Subscription::detached()
    }

    fn add_progress_listener(&self, _listener: ProgressListener) -> Subscription {
        Subscription::detached()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_passthrough_caches_nothing() {
        let cache: Arc<dyn MediaCache> = Arc::new(PassthroughCache);
        let url = "https://x/a.mp3";

        cache.cache_url(url, Some(TrackMetadata::new("t1"))).await;

        assert_eq!(cache.resolve_url(url, Some(&TrackMetadata::new("t1"))).await, url);
        assert!(!cache.is_cached(url).await);
        assert!(cache.get_all_cached_tracks().await.is_empty());
        assert!(cache.get_cached_meta(url).await.is_none());
        assert!(cache.find_cached_url_by_track_id("t1").await.is_none());
        assert!(cache.get_progress(url).is_none());

        cache.evict_url(url).await;
        cache.clear_cache().await;
        cache.add_listener(Box::new(|_| {})).unsubscribe();
        cache.add_progress_listener(Box::new(|_| {})).unsubscribe();
    }

    /// Writes the URL itself as the file body
    struct EchoDownloader;

    #[async_trait]
    impl crate::Downloader for EchoDownloader {
        async fn download(
            &self,
            url: &str,
            dest: &std::path::Path,
            _on_progress: crate::downloader::ProgressFn<'_>,
        ) -> Result<u64, crate::CacheError> {
            tokio::fs::write(dest, url).await?;
            Ok(url.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_audio_cache_behind_trait_object() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::CacheConfig::new(dir.path().join("cache"));
        let audio = AudioCache::with_downloader(config, EchoDownloader).unwrap();
        let cache: Arc<dyn MediaCache> = Arc::new(audio);

        let cached = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = cached.clone();
        let subscription = cache.add_listener(Box::new(move |url| sink.lock().push(url.to_owned())));

        let url = "https://x/a.mp3";
        cache.cache_url(url, Some(TrackMetadata::new("t1"))).await;
        subscription.unsubscribe();

        let local = cache.resolve_url(url, None).await;
        assert_ne!(local, url);
        assert_eq!(cache.find_cached_url_by_track_id("t1").await, Some(local));
        assert!(cache.get_progress(url).unwrap().is_complete());
        assert_eq!(*cached.lock(), [url.to_owned()]);

        cache.evict_url(url).await;
        assert!(!cache.is_cached(url).await);
        assert_eq!(cached.lock().len(), 1);
    }
}
