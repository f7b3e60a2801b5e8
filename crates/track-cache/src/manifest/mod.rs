//! # Manifest
//!
//! The durable index of cached entries: its data model, sanitization rules
//! and the store that serializes every change to it.

mod sanitize;
mod store;
mod types;

pub use sanitize::Sanitized;
pub use store::{Committed, ManifestStore};
pub use types::{CacheEntry, CachedMeta, MANIFEST_VERSION, Manifest, TrackMetadata};
