//! # Manifest Types
//!
//! The durable index document and the records it holds. Field names on the
//! wire follow the `index-v1.json` format.

use serde::{Deserialize, Serialize};

/// Version written into every persisted manifest
pub const MANIFEST_VERSION: u32 = 1;

/// Descriptive data about the track behind a cached URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    /// Stable identifier of the logical track, independent of its URL
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
}

impl TrackMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_artwork(mut self, artwork: impl Into<String>) -> Self {
        self.artwork = Some(artwork.into());
        self
    }

    pub fn with_duration_sec(mut self, duration_sec: f64) -> Self {
        self.duration_sec = Some(duration_sec);
        self
    }
}

/// One cached resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Remote URL, unique within a manifest
    pub url: String,
    /// Absolute path of the local copy
    #[serde(rename = "localUri")]
    pub local_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TrackMetadata>,
    /// Milliseconds since the Unix epoch at which the entry was cached
    #[serde(rename = "timestamp")]
    pub cached_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl CacheEntry {
    pub fn track_id(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.id.as_str())
    }
}

/// The durable index of cached entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub entries: Vec<CacheEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: Vec::new(),
        }
    }
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|entry| entry.url == url)
    }

    /// Insert `entry` as the most recent one, replacing any entry for the same URL
    pub fn upsert_front(mut self, entry: CacheEntry) -> Self {
        self.entries.retain(|existing| existing.url != entry.url);
        self.entries.insert(0, entry);
        self
    }

    /// Drop the entry for `url`, if any
    pub fn without(mut self, url: &str) -> Self {
        self.entries.retain(|entry| entry.url != url);
        self
    }
}

/// Snapshot returned by metadata lookups
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMeta {
    pub url: String,
    pub metadata: Option<TrackMetadata>,
    pub timestamp: i64,
}

impl From<&CacheEntry> for CachedMeta {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            url: entry.url.clone(),
            metadata: entry.metadata.clone(),
            timestamp: entry.cached_at,
        }
    }
}
