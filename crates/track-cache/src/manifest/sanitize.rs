//! # Manifest Sanitization
//!
//! Turns whatever is found on disk into a well-formed [`Manifest`], and
//! re-establishes the ordering and size invariants after every mutation.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::types::{CacheEntry, MANIFEST_VERSION, Manifest, TrackMetadata};

/// Result of sanitizing a manifest
#[derive(Debug, Clone, Default)]
pub struct Sanitized {
    pub manifest: Manifest,
    /// Entries dropped because the manifest exceeded its entry cap
    pub truncated: Vec<CacheEntry>,
}

impl Manifest {
    /// Drop unusable and duplicate entries, sort by recency and apply the cap.
    ///
    /// The sort is stable, so entries sharing a timestamp keep their relative
    /// order. Duplicate URLs keep the first entry after sorting, i.e. the most
    /// recent one.
    pub fn sanitized(self, max_entries: usize) -> Sanitized {
        let mut entries: Vec<CacheEntry> = self
            .entries
            .into_iter()
            .filter(|entry| !entry.url.is_empty() && !entry.local_path.is_empty())
            .collect();

        entries.sort_by(|a, b| b.cached_at.cmp(&a.cached_at));

        let mut seen = HashSet::new();
        entries.retain(|entry| seen.insert(entry.url.clone()));

        let truncated = if entries.len() > max_entries {
            entries.split_off(max_entries)
        } else {
            Vec::new()
        };

        Sanitized {
            manifest: Manifest {
                version: MANIFEST_VERSION,
                entries,
            },
            truncated,
        }
    }

    /// Leniently rebuild a manifest from an arbitrary JSON document.
    ///
    /// Anything that is not an object with an `entries` array yields an empty
    /// manifest. Individual entries are kept when they carry non-empty `url`
    /// and `localUri` strings; malformed optional fields are coerced or dropped.
    pub fn from_json_value(value: &Value, max_entries: usize) -> Sanitized {
        let Some(raw_entries) = value.get("entries").and_then(Value::as_array) else {
            return Sanitized::default();
        };

        let entries = raw_entries
            .iter()
            .filter_map(Value::as_object)
            .filter_map(entry_from_object)
            .collect();

        Manifest {
            version: MANIFEST_VERSION,
            entries,
        }
        .sanitized(max_entries)
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn entry_from_object(object: &Map<String, Value>) -> Option<CacheEntry> {
    let url = non_empty_str(object, "url")?;
    let local_path = non_empty_str(object, "localUri")?;

    let cached_at = object
        .get("timestamp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0);

    let size_bytes = object
        .get("sizeBytes")
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)));

    let metadata = object
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(metadata_from_object);

    Some(CacheEntry {
        url: url.to_owned(),
        local_path: local_path.to_owned(),
        metadata,
        cached_at,
        size_bytes,
    })
}

fn metadata_from_object(object: &Map<String, Value>) -> Option<TrackMetadata> {
    let id = match object.get("id")? {
        Value::String(id) if !id.is_empty() => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };

    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };

    Some(TrackMetadata {
        id,
        title: text("title"),
        artist: text("artist"),
        artwork: non_empty_str(object, "artwork").map(str::to_owned),
        duration_sec: object
            .get("durationSec")
            .and_then(Value::as_f64)
            .filter(|d| d.is_finite() && *d >= 0.0),
    })
}
