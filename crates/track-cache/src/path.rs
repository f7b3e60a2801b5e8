//! # Path Resolver
//!
//! Maps a remote URL onto a short, filesystem-safe file name. The mapping is
//! reproducible without a lookup, but it is only used when writing a new file:
//! the manifest stays the authority on which file backs which URL.

use std::path::{Path, PathBuf};

use url::Url;

/// Extension used when none can be sniffed from the URL
pub const FALLBACK_EXTENSION: &str = "audio";

const MAX_EXTENSION_LEN: usize = 6;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the URL bytes
pub fn hash_url(url: &str) -> u32 {
    url.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Best-effort extension from the last path segment of `url`
pub fn sniff_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_owned(),
        // Not absolute, strip query and fragment by hand
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_owned(),
    };

    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// File name for `url`: eight hex digits plus the sniffed or fallback extension
pub fn cache_file_name(url: &str) -> String {
    let extension = sniff_extension(url).unwrap_or_else(|| FALLBACK_EXTENSION.to_owned());
    format!("{:08x}.{extension}", hash_url(url))
}

/// Destination path for `url` inside `cache_dir`
pub fn cache_file_path(cache_dir: &Path, url: &str) -> PathBuf {
    cache_dir.join(cache_file_name(url))
}
