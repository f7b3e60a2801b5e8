//! # Event Bus
//!
//! Listener registries that let UI observers follow the cache without the
//! cache knowing about them. Delivery is synchronous and in registration
//! order; a listener that panics is logged and skipped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// Progress of a track being cached, in the shape playback UIs consume
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCacheProgress {
    pub url: String,
    pub window_start_sec: f64,
    pub window_end_sec: f64,
    pub cached_chunks: u32,
    pub total_chunks: u32,
    pub cached_seconds_ahead: f64,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
}

impl AudioCacheProgress {
    pub const TOTAL_CHUNKS: u32 = 100;

    /// Build a record from a completion ratio and an optional track duration
    pub fn from_ratio(url: &str, ratio: f64, duration_sec: Option<f64>) -> Self {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let duration = duration_sec
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0);

        Self {
            url: url.to_owned(),
            window_start_sec: 0.0,
            window_end_sec: duration,
            cached_chunks: (ratio * f64::from(Self::TOTAL_CHUNKS)).floor() as u32,
            total_chunks: Self::TOTAL_CHUNKS,
            cached_seconds_ahead: duration * ratio,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cached_chunks >= self.total_chunks
    }
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Slots<T> = Mutex<Vec<(u64, Listener<T>)>>;

/// Handle returned by `add_listener`; call [`Subscription::unsubscribe`] to
/// stop receiving events. Dropping the handle keeps the listener registered.
#[must_use = "dropping a Subscription keeps the listener registered forever"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// A subscription with nothing to remove
    pub fn detached() -> Self {
        Self { remove: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// An ordered set of callbacks for one kind of event
pub struct ListenerRegistry<T: ?Sized> {
    next_id: AtomicU64,
    slots: Arc<Slots<T>>,
}

impl<T: ?Sized + 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            slots: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: ?Sized + 'static> ListenerRegistry<T> {
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<T> = Arc::new(listener);
        self.slots.lock().push((id, listener));

        let slots: Weak<Slots<T>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.lock().retain(|(slot_id, _)| *slot_id != id);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to a snapshot of the current listeners
    pub fn emit(&self, event: &T) {
        // Listeners may (un)subscribe from inside the callback
        let snapshot: Vec<(u64, Listener<T>)> = self.slots.lock().clone();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = id, "Cache listener panicked, continuing delivery");
            }
        }
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

/// Completion and progress registries plus the latest progress per URL
#[derive(Default)]
pub struct EventBus {
    completions: ListenerRegistry<str>,
    progress: ListenerRegistry<AudioCacheProgress>,
    latest: Mutex<HashMap<String, AudioCacheProgress>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to URLs whose cached state changed (cached or evicted)
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.completions.add_listener(listener)
    }

    pub fn add_progress_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AudioCacheProgress) + Send + Sync + 'static,
    {
        self.progress.add_listener(listener)
    }

    pub fn notify_url(&self, url: &str) {
        self.completions.emit(url);
    }

    /// Record `progress` as the latest for its URL and fan it out
    pub fn publish_progress(&self, progress: AudioCacheProgress) {
        self.latest
            .lock()
            .insert(progress.url.clone(), progress.clone());
        self.progress.emit(&progress);
    }

    pub fn progress_for(&self, url: &str) -> Option<AudioCacheProgress> {
        self.latest.lock().get(url).cloned()
    }

    pub fn forget_progress(&self, url: &str) {
        self.latest.lock().remove(url);
    }

    pub fn forget_all_progress(&self) {
        self.latest.lock().clear();
    }

    /// Drop every listener, used on shutdown
    pub fn clear_listeners(&self) {
        self.completions.clear();
        self.progress.clear();
    }
}
