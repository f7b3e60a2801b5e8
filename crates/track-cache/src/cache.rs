//! # Audio Cache
//!
//! The on-disk cache service. It ties the manifest store, the downloader and
//! the event bus together behind a fail-soft API: no operation here returns an
//! error, a failure simply leaves the cache as it was.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tokio::io;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::downloader::{Downloader, HttpDownloader, TransferProgress, partial_path};
use crate::events::{AudioCacheProgress, EventBus, Subscription};
use crate::manifest::{CacheEntry, CachedMeta, Committed, Manifest, ManifestStore, TrackMetadata};
use crate::path::cache_file_path;
use crate::{CacheConfig, CacheError};

/// Totals over the entries whose files are present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn file_exists(path: impl AsRef<Path>) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.is_file())
}

async fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = ?path, "Removed cached file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove cached file"),
    }
}

/// On-disk cache of remotely streamed audio tracks
pub struct AudioCache {
    config: Arc<CacheConfig>,
    store: ManifestStore,
    events: EventBus,
    downloader: Arc<dyn Downloader>,
    tasks: TaskTracker,
    // Destinations with a download that has not committed yet
    writing: Mutex<HashMap<PathBuf, usize>>,
}

impl std::fmt::Debug for AudioCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("max_entries", &self.config.max_entries)
            .finish_non_exhaustive()
    }
}

impl AudioCache {
    /// Create a cache that downloads over HTTP.
    ///
    /// Fails only for an invalid configuration or an HTTP client that cannot
    /// be built.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let downloader = HttpDownloader::new(&config.downloader)?;
        Self::with_downloader(config, downloader)
    }

    /// Create a cache that fetches through a custom [`Downloader`]
    pub fn with_downloader<D>(config: CacheConfig, downloader: D) -> Result<Self, CacheError>
    where
        D: Downloader + 'static,
    {
        config.validate()?;

        let store = ManifestStore::new(config.manifest_path(), config.max_entries);

        Ok(Self {
            config: Arc::new(config),
            store,
            events: EventBus::new(),
            downloader: Arc::new(downloader),
            tasks: TaskTracker::new(),
            writing: Mutex::new(HashMap::new()),
        })
    }

    /// Create and initialize a shared cache
    pub async fn open(config: CacheConfig) -> Result<Arc<Self>, CacheError> {
        let cache = Arc::new(Self::new(config)?);
        cache.init().await;
        Ok(cache)
    }

    /// Prepare the cache directory and warm the manifest memo
    pub async fn init(&self) {
        if let Err(e) = fs::create_dir_all(self.cache_dir()).await {
            warn!(dir = ?self.cache_dir(), error = %e, "Failed to create cache directory");
        }
        let manifest = self.store.load().await;
        info!(
            dir = ?self.cache_dir(),
            entries = manifest.len(),
            "Audio cache ready"
        );
    }

    /// Wait for every spawned caching task, then drop all listeners
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.events.clear_listeners();
        debug!("Audio cache shut down");
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Raw manifest snapshot, file presence not verified
    pub async fn manifest(&self) -> Arc<Manifest> {
        self.store.load().await
    }

    async fn verified_entry(&self, url: &str) -> Option<CacheEntry> {
        let manifest = self.store.load().await;
        let entry = manifest.get(url)?;
        if file_exists(&entry.local_path).await {
            Some(entry.clone())
        } else {
            debug!(url, path = %entry.local_path, "Cached file missing");
            None
        }
    }

    async fn verified_entry_by_track_id(&self, track_id: &str) -> Option<CacheEntry> {
        if track_id.is_empty() {
            return None;
        }
        let manifest = self.store.load().await;
        for entry in manifest
            .entries
            .iter()
            .filter(|entry| entry.track_id() == Some(track_id))
        {
            if file_exists(&entry.local_path).await {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Local path for `url` if cached, else `url` unchanged.
    ///
    /// When the exact URL is not cached but `metadata` names a track that is
    /// cached under another URL (a re-signed or expired link), that copy is
    /// returned instead.
    pub async fn resolve_url(&self, url: &str, metadata: Option<&TrackMetadata>) -> String {
        if let Some(entry) = self.verified_entry(url).await {
            debug!(url, path = %entry.local_path, "Cache hit");
            return entry.local_path;
        }

        if let Some(track_id) = metadata.map(|m| m.id.as_str()) {
            if let Some(entry) = self.verified_entry_by_track_id(track_id).await {
                debug!(url, track_id, path = %entry.local_path, "Cache hit by track id");
                return entry.local_path;
            }
        }

        debug!(url, "Cache miss");
        url.to_owned()
    }

    pub async fn find_cached_url_by_track_id(&self, track_id: &str) -> Option<String> {
        self.verified_entry_by_track_id(track_id)
            .await
            .map(|entry| entry.local_path)
    }

    pub async fn get_cached_meta(&self, url: &str) -> Option<CachedMeta> {
        self.verified_entry(url).await.map(|entry| CachedMeta::from(&entry))
    }

    pub async fn is_cached(&self, url: &str) -> bool {
        self.verified_entry(url).await.is_some()
    }

    /// Every entry whose file is present, most recently cached first
    pub async fn get_all_cached_tracks(&self) -> Vec<CacheEntry> {
        let manifest = self.store.load().await;
        let mut present = Vec::with_capacity(manifest.len());
        for entry in &manifest.entries {
            if file_exists(&entry.local_path).await {
                present.push(entry.clone());
            }
        }
        present
    }

    pub async fn stats(&self) -> CacheStats {
        let tracks = self.get_all_cached_tracks().await;
        CacheStats {
            entries: tracks.len(),
            total_bytes: tracks.iter().filter_map(|entry| entry.size_bytes).sum(),
        }
    }

    /// Latest progress published for `url`
    pub fn get_progress(&self, url: &str) -> Option<AudioCacheProgress> {
        self.events.progress_for(url)
    }

    /// Listen for URLs that were cached or evicted
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.add_listener(listener)
    }

    pub fn add_progress_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AudioCacheProgress) + Send + Sync + 'static,
    {
        self.events.add_progress_listener(listener)
    }

    /// Download `url` into the cache and register it.
    ///
    /// Already cached files are re-registered without a download. Failures
    /// are logged and leave the manifest untouched.
    pub async fn cache_url(&self, url: &str, metadata: Option<TrackMetadata>) {
        if let Err(e) = self.try_cache_url(url, metadata).await {
            self.events.forget_progress(url);
            warn!(url, error = %e, "Failed to cache track");
        }
    }

    /// Run [`AudioCache::cache_url`] in the background.
    ///
    /// The task is tracked, so [`AudioCache::shutdown`] waits for it.
    pub fn spawn_cache_url(
        self: &Arc<Self>,
        url: impl Into<String>,
        metadata: Option<TrackMetadata>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let url = url.into();
        self.tasks.spawn(async move {
            cache.cache_url(&url, metadata).await;
        })
    }

    async fn try_cache_url(
        &self,
        url: &str,
        metadata: Option<TrackMetadata>,
    ) -> Result<(), CacheError> {
        if let Some(existing) = self.verified_entry(url).await {
            return self.refresh_entry(existing, metadata).await;
        }

        fs::create_dir_all(self.cache_dir()).await?;

        let dest = cache_file_path(self.cache_dir(), url);
        let duration = metadata.as_ref().and_then(|m| m.duration_sec);

        self.begin_write(&dest).await;
        let committed = self.download_and_commit(url, &dest, metadata).await;
        self.end_write(&dest).await;
        let committed = committed?;

        if !committed.truncated.is_empty() {
            self.prune_truncated(&committed.truncated).await;
        }

        self.finish(url, duration);
        Ok(())
    }

    async fn download_and_commit(
        &self,
        url: &str,
        dest: &Path,
        metadata: Option<TrackMetadata>,
    ) -> Result<Committed, CacheError> {
        let duration = metadata.as_ref().and_then(|m| m.duration_sec);
        let on_progress = |progress: TransferProgress| {
            self.events
                .publish_progress(AudioCacheProgress::from_ratio(url, progress.ratio(), duration));
        };
        let written = self.downloader.download(url, dest, &on_progress).await?;

        let size_bytes = match fs::metadata(dest).await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!(path = ?dest, error = %e, "Failed to stat downloaded file");
                Some(written)
            }
        };

        let local_path = dest.to_string_lossy().into_owned();
        let entry_url = url.to_owned();
        let committed = self
            .store
            .mutate(move |manifest| {
                manifest.upsert_front(CacheEntry {
                    url: entry_url,
                    local_path,
                    metadata,
                    cached_at: now_millis(),
                    size_bytes,
                })
            })
            .await?;

        info!(url, path = ?dest, bytes = ?size_bytes, "Cached track");
        Ok(committed)
    }

    async fn begin_write(&self, dest: &Path) {
        *self.writing.lock().await.entry(dest.to_path_buf()).or_insert(0) += 1;
    }

    async fn end_write(&self, dest: &Path) {
        let mut writing = self.writing.lock().await;
        if let Some(count) = writing.get_mut(dest) {
            *count -= 1;
            if *count == 0 {
                writing.remove(dest);
            }
        }
    }

    /// Re-register an entry whose file is already on disk
    async fn refresh_entry(
        &self,
        existing: CacheEntry,
        metadata: Option<TrackMetadata>,
    ) -> Result<(), CacheError> {
        let size_bytes = fs::metadata(&existing.local_path)
            .await
            .map(|meta| meta.len())
            .ok()
            .or(existing.size_bytes);
        let duration = metadata
            .as_ref()
            .or(existing.metadata.as_ref())
            .and_then(|m| m.duration_sec);
        let url = existing.url.clone();

        self.store
            .mutate(move |manifest| {
                manifest.upsert_front(CacheEntry {
                    metadata: metadata.or(existing.metadata),
                    cached_at: now_millis(),
                    size_bytes,
                    ..existing
                })
            })
            .await?;

        debug!(url = %url, "Track already cached, refreshed entry");
        self.finish(&url, duration);
        Ok(())
    }

    fn finish(&self, url: &str, duration: Option<f64>) {
        self.events
            .publish_progress(AudioCacheProgress::from_ratio(url, 1.0, duration));
        self.events.notify_url(url);
    }

    /// Delete files of entries dropped by the entry cap
    async fn prune_truncated(&self, truncated: &[CacheEntry]) {
        for entry in truncated {
            self.events.forget_progress(&entry.url);
        }

        if !self.config.prune_truncated_files {
            debug!(
                count = truncated.len(),
                "Entry cap dropped entries, keeping their files"
            );
            return;
        }

        self.remove_unreferenced(
            truncated
                .iter()
                .map(|entry| PathBuf::from(&entry.local_path))
                .collect::<Vec<_>>(),
        )
        .await;
    }

    /// Delete `paths` unless the current manifest references them or a
    /// download is still writing them.
    ///
    /// Downloads register before writing and release only after committing,
    /// so holding the registry lock for the whole pass keeps a fresh file
    /// from being deleted under its entry.
    async fn remove_unreferenced(&self, paths: impl IntoIterator<Item = PathBuf>) {
        let writing = self.writing.lock().await;
        let manifest = self.store.load().await;
        let referenced: HashSet<&str> = manifest
            .entries
            .iter()
            .map(|entry| entry.local_path.as_str())
            .collect();

        for path in paths {
            let busy = writing
                .keys()
                .any(|dest| *dest == path || partial_path(dest) == path);
            if busy || referenced.contains(&*path.to_string_lossy()) {
                debug!(path = ?path, busy, "Keeping file still in use");
                continue;
            }
            remove_file_quietly(&path).await;
        }
    }

    /// Remove `url` and its file from the cache. A no-op for unknown URLs.
    pub async fn evict_url(&self, url: &str) {
        let mut removed = None;
        let result = self
            .store
            .mutate(|manifest| {
                removed = manifest.get(url).cloned();
                manifest.without(url)
            })
            .await;
        if let Err(e) = result {
            warn!(url, error = %e, "Failed to remove manifest entry");
            return;
        }

        let resolver_path = cache_file_path(self.cache_dir(), url);
        let mut paths: Vec<PathBuf> = Vec::with_capacity(3);
        if let Some(entry) = &removed {
            paths.push(PathBuf::from(&entry.local_path));
        }
        paths.push(partial_path(&resolver_path));
        paths.push(resolver_path);
        self.remove_unreferenced(paths).await;

        self.events.forget_progress(url);

        if removed.is_none() {
            debug!(url, "Nothing to evict");
            return;
        }

        info!(url, "Evicted track");
        self.events.notify_url(url);
    }

    /// Remove every cached file and the manifest itself
    pub async fn clear_cache(&self) {
        self.store.wipe(self.cache_dir()).await;
        self.events.forget_all_progress();
        info!(dir = ?self.cache_dir(), "Cleared audio cache");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use tempfile::TempDir;
    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::downloader::ProgressFn;

    /// Writes a fixed body in a few chunks; URLs containing "fail" error out
    #[derive(Default)]
    struct ScriptedDownloader {
        calls: AtomicUsize,
    }

    const BODY: &[u8] = b"ID3 fake audio payload";

    #[async_trait]
    impl Downloader for ScriptedDownloader {
        async fn download(
            &self,
            url: &str,
            dest: &Path,
            on_progress: ProgressFn<'_>,
        ) -> Result<u64, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let total = BODY.len() as u64;
            on_progress(TransferProgress {
                bytes_written: 0,
                total_bytes: Some(total),
            });
            tokio::task::yield_now().await;

            if url.contains("fail") {
                return Err(CacheError::Status(StatusCode::BAD_GATEWAY));
            }

            on_progress(TransferProgress {
                bytes_written: total / 2,
                total_bytes: Some(total),
            });
            tokio::fs::write(dest, BODY).await?;
            tokio::task::yield_now().await;
            on_progress(TransferProgress {
                bytes_written: total,
                total_bytes: Some(total),
            });
            Ok(total)
        }
    }

    /// Once armed, holds the next download after its file is written until
    /// a permit is added to `hold`
    struct GatedDownloader {
        armed: AtomicBool,
        written: Notify,
        hold: Semaphore,
    }

    #[async_trait]
    impl Downloader for GatedDownloader {
        async fn download(
            &self,
            _url: &str,
            dest: &Path,
            _on_progress: ProgressFn<'_>,
        ) -> Result<u64, CacheError> {
            tokio::fs::write(dest, BODY).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.written.notify_one();
                self.hold.acquire().await.unwrap().forget();
            }
            Ok(BODY.len() as u64)
        }
    }

    fn gated_cache(dir: &TempDir, max_entries: usize) -> (Arc<AudioCache>, Arc<GatedDownloader>) {
        let mut config = CacheConfig::new(dir.path().join("audio-cache"));
        config.max_entries = max_entries;
        let downloader = Arc::new(GatedDownloader {
            armed: AtomicBool::new(false),
            written: Notify::new(),
            hold: Semaphore::new(0),
        });
        let cache = AudioCache::with_downloader(config, downloader.clone()).unwrap();
        (Arc::new(cache), downloader)
    }

    /// Cache `url`, delete its file behind the cache's back, then start a
    /// re-download that stops right after writing the file
    async fn redownload_held(
        cache: &Arc<AudioCache>,
        downloader: &GatedDownloader,
        url: &str,
    ) -> JoinHandle<()> {
        cache.cache_url(url, None).await;
        std::fs::remove_file(cache.resolve_url(url, None).await).unwrap();

        downloader.armed.store(true, Ordering::SeqCst);
        let task = cache.spawn_cache_url(url, None);
        downloader.written.notified().await;
        task
    }

    struct Fixture {
        _dir: TempDir,
        cache: Arc<AudioCache>,
        downloader: Arc<ScriptedDownloader>,
    }

    fn fixture_with(configure: impl FnOnce(CacheConfig) -> CacheConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = configure(CacheConfig::new(dir.path().join("audio-cache")));
        let downloader = Arc::new(ScriptedDownloader::default());
        let cache = AudioCache::with_downloader(config, downloader.clone()).unwrap();
        Fixture {
            _dir: dir,
            cache: Arc::new(cache),
            downloader,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|config| config)
    }

    fn track(id: &str) -> TrackMetadata {
        TrackMetadata::new(id).with_title("Title").with_artist("Artist")
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let result = AudioCache::with_downloader(CacheConfig::new(""), ScriptedDownloader::default());
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_cache_then_resolve() {
        let Fixture { _dir, cache, .. } = fixture();
        let url = "https://x/a.mp3";

        cache.cache_url(url, Some(track("t1"))).await;

        assert!(cache.is_cached(url).await);
        let resolved = cache.resolve_url(url, None).await;
        assert_ne!(resolved, url);
        assert!(resolved.ends_with(&crate::path::cache_file_name(url)));
        assert_eq!(std::fs::read(&resolved).unwrap(), BODY);

        let tracks = cache.get_all_cached_tracks().await;
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].size_bytes, Some(BODY.len() as u64));
        assert_eq!(tracks[0].track_id(), Some("t1"));
    }

    #[tokio::test]
    async fn test_uncached_url_passes_through() {
        let Fixture { _dir, cache, .. } = fixture();
        let url = "https://x/never.mp3";

        assert_eq!(cache.resolve_url(url, Some(&track("zzz"))).await, url);
        assert!(!cache.is_cached(url).await);
        assert!(cache.get_cached_meta(url).await.is_none());
        assert!(cache.find_cached_url_by_track_id("zzz").await.is_none());
    }

    #[tokio::test]
    async fn test_metadata_fallback_by_track_id() {
        let Fixture { _dir, cache, .. } = fixture();
        cache.cache_url("https://x/a.mp3?sig=old", Some(track("t1"))).await;
        let cached = cache.resolve_url("https://x/a.mp3?sig=old", None).await;

        let resolved = cache
            .resolve_url("https://x/a.mp3?sig=new", Some(&track("t1")))
            .await;
        assert_eq!(resolved, cached);
        assert_eq!(cache.find_cached_url_by_track_id("t1").await, Some(cached));
        assert!(!cache.is_cached("https://x/a.mp3?sig=new").await);
    }

    #[tokio::test]
    async fn test_concurrent_caching_loses_no_entries() {
        let Fixture { _dir, cache, .. } = fixture();

        let handles: Vec<_> = (0..24)
            .map(|i| cache.spawn_cache_url(format!("https://x/{i}.mp3"), None))
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.manifest().await.len(), 24);
        assert_eq!(cache.get_all_cached_tracks().await.len(), 24);
    }

    #[tokio::test]
    async fn test_entry_cap_keeps_most_recent() {
        let Fixture { _dir, cache, .. } = fixture();

        for i in 0..205 {
            cache.cache_url(&format!("https://x/{i}.mp3"), None).await;
        }

        let manifest = cache.manifest().await;
        assert_eq!(manifest.len(), 200);
        assert_eq!(manifest.entries[0].url, "https://x/204.mp3");
        assert_eq!(manifest.entries[199].url, "https://x/5.mp3");
        for i in 0..5 {
            assert!(manifest.get(&format!("https://x/{i}.mp3")).is_none());
        }

        // Files of dropped entries are pruned
        let files = std::fs::read_dir(cache.cache_dir())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().unwrap() == "mp3")
            .count();
        assert_eq!(files, 200);
    }

    #[tokio::test]
    async fn test_entry_cap_can_keep_orphaned_files() {
        let Fixture { _dir, cache, .. } = fixture_with(|mut config| {
            config.max_entries = 2;
            config.prune_truncated_files = false;
            config
        });

        for i in 0..3 {
            cache.cache_url(&format!("https://x/{i}.mp3"), None).await;
        }

        assert_eq!(cache.manifest().await.len(), 2);
        assert!(cache.cache_dir().join(crate::path::cache_file_name("https://x/0.mp3")).exists());
    }

    #[tokio::test]
    async fn test_recache_skips_download_and_refreshes() {
        let Fixture { _dir, cache, downloader } = fixture();
        cache.cache_url("https://x/a.mp3", Some(track("t1"))).await;
        cache.cache_url("https://x/b.mp3", None).await;
        let before = cache.get_cached_meta("https://x/a.mp3").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.cache_url("https://x/a.mp3", None).await;

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
        let manifest = cache.manifest().await;
        assert_eq!(manifest.entries[0].url, "https://x/a.mp3");
        assert!(manifest.entries[0].cached_at > before.timestamp);
        // Existing metadata survives a refresh without new metadata
        assert_eq!(manifest.entries[0].track_id(), Some("t1"));
    }

    #[tokio::test]
    async fn test_failed_download_changes_nothing() {
        let Fixture { _dir, cache, .. } = fixture();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let _subscription = cache.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cache.cache_url("https://x/fail.mp3", None).await;

        assert!(cache.manifest().await.is_empty());
        assert!(!cache.is_cached("https://x/fail.mp3").await);
        assert!(cache.get_progress("https://x/fail.mp3").is_none());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_out_of_band_deletion_is_a_miss() {
        let Fixture { _dir, cache, .. } = fixture();
        let url = "https://x/a.mp3";
        cache.cache_url(url, Some(track("t1"))).await;

        let path = cache.resolve_url(url, None).await;
        std::fs::remove_file(&path).unwrap();

        assert!(!cache.is_cached(url).await);
        assert_eq!(cache.resolve_url(url, Some(&track("t1"))).await, url);
        assert!(cache.get_all_cached_tracks().await.is_empty());
        // The entry itself stays until evicted or re-cached
        assert_eq!(cache.manifest().await.len(), 1);

        cache.cache_url(url, None).await;
        assert!(cache.is_cached(url).await);
    }

    #[tokio::test]
    async fn test_eviction_is_idempotent() {
        let Fixture { _dir, cache, .. } = fixture();
        let url = "https://x/a.mp3";
        cache.cache_url(url, None).await;
        let path = cache.resolve_url(url, None).await;

        let evicted = Arc::new(Mutex::new(Vec::new()));
        let seen = evicted.clone();
        let _subscription = cache.add_listener(move |u| seen.lock().push(u.to_owned()));

        cache.evict_url(url).await;
        assert!(!cache.is_cached(url).await);
        assert!(!Path::new(&path).exists());
        assert!(cache.get_progress(url).is_none());

        cache.evict_url(url).await;
        assert!(!cache.is_cached(url).await);
        assert_eq!(*evicted.lock(), [url.to_owned()]);
    }

    #[tokio::test]
    async fn test_clear_cache_empties_everything() {
        let Fixture { _dir, cache, .. } = fixture();
        let urls: Vec<String> = (0..3).map(|i| format!("https://x/{i}.mp3")).collect();
        for url in &urls {
            cache.cache_url(url, None).await;
        }

        cache.clear_cache().await;

        assert!(cache.get_all_cached_tracks().await.is_empty());
        for url in &urls {
            assert!(!cache.is_cached(url).await);
            assert!(cache.get_progress(url).is_none());
        }
        assert!(!cache.config().manifest_path().exists());

        // The cache keeps working after a clear
        cache.cache_url(&urls[0], None).await;
        assert!(cache.is_cached(&urls[0]).await);
    }

    #[tokio::test]
    async fn test_progress_is_published() {
        let Fixture { _dir, cache, .. } = fixture();
        let url = "https://x/a.mp3";
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        let subscription = cache.add_progress_listener(move |p| sink.lock().push(p.clone()));

        cache
            .cache_url(url, Some(track("t1").with_duration_sec(100.0)))
            .await;
        subscription.unsubscribe();

        let records = records.lock();
        assert!(records.len() >= 3);
        assert_eq!(records[0].cached_chunks, 0);
        assert!(records.iter().all(|p| p.url == url && p.window_end_sec == 100.0));
        let last = records.last().unwrap();
        assert!(last.is_complete());
        assert_eq!(last.cached_seconds_ahead, 100.0);

        assert!(cache.get_progress(url).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_abort_caching() {
        let Fixture { _dir, cache, .. } = fixture();
        let _bad = cache.add_progress_listener(|_| panic!("boom"));
        let _worse = cache.add_listener(|_| panic!("boom"));

        cache.cache_url("https://x/a.mp3", None).await;
        assert!(cache.is_cached("https://x/a.mp3").await);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_spawned_tasks() {
        let Fixture { _dir, cache, .. } = fixture();
        for i in 0..5 {
            let _ = cache.spawn_cache_url(format!("https://x/{i}.mp3"), None);
        }

        cache.shutdown().await;
        assert_eq!(cache.manifest().await.len(), 5);
    }

    #[tokio::test]
    async fn test_manifest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path().join("audio-cache"));
        let url = "https://x/a.mp3";

        let first = AudioCache::with_downloader(config.clone(), ScriptedDownloader::default()).unwrap();
        first.cache_url(url, Some(track("t1"))).await;
        let path = first.resolve_url(url, None).await;
        drop(first);

        let second = AudioCache::with_downloader(config, ScriptedDownloader::default()).unwrap();
        second.init().await;
        assert_eq!(second.resolve_url(url, None).await, path);
        let meta = second.get_cached_meta(url).await.unwrap();
        assert_eq!(meta.url, url);
        assert_eq!(meta.metadata.unwrap().id, "t1");
    }

    #[tokio::test]
    async fn test_stats_cover_present_files() {
        let Fixture { _dir, cache, .. } = fixture();
        cache.cache_url("https://x/a.mp3", None).await;
        cache.cache_url("https://x/b.mp3", None).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_bytes, 2 * BODY.len() as u64);
    }

    #[tokio::test]
    async fn test_truncation_keeps_file_being_redownloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, downloader) = gated_cache(&dir, 1);
        let a = "https://x/a.mp3";

        let task = redownload_held(&cache, &downloader, a).await;
        // Pushes the stale entry for `a` past the cap while its new file waits
        cache.cache_url("https://x/b.mp3", None).await;
        downloader.hold.add_permits(1);
        task.await.unwrap();

        assert!(cache.is_cached(a).await);
        assert_eq!(cache.manifest().await.entries[0].url, a);
        // `b` fell off the cap once `a` committed, and its file went with it
        assert!(!cache.cache_dir().join(crate::path::cache_file_name("https://x/b.mp3")).exists());
    }

    #[tokio::test]
    async fn test_evict_during_redownload_keeps_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, downloader) = gated_cache(&dir, 200);
        let url = "https://x/a.mp3";

        let task = redownload_held(&cache, &downloader, url).await;
        cache.evict_url(url).await;
        assert!(cache.manifest().await.get(url).is_none());

        downloader.hold.add_permits(1);
        task.await.unwrap();

        assert!(cache.is_cached(url).await);
        assert_eq!(cache.manifest().await.len(), 1);
    }

    #[tokio::test]
    async fn test_write_registry_drains() {
        let Fixture { _dir, cache, .. } = fixture();
        cache.cache_url("https://x/a.mp3", None).await;
        cache.cache_url("https://x/fail.mp3", None).await;
        assert!(cache.writing.lock().await.is_empty());
    }
}
