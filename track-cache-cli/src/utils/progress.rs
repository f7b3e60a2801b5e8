use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use track_cache::AudioCacheProgress;

fn cache_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Progress bars for tracks being cached, one per URL
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: true,
        }
    }

    pub fn handle_progress(&self, progress: &AudioCacheProgress) {
        if self.disabled {
            return;
        }

        let mut bars = self.bars.lock();

        let bar = bars.entry(progress.url.clone()).or_insert_with(|| {
            let bar = self
                .multi
                .add(ProgressBar::new(u64::from(progress.total_chunks)));
            bar.set_style(cache_style());
            bar.set_message(format!("Caching {}", progress.url));
            bar.enable_steady_tick(Duration::from_millis(500));
            bar
        });
        bar.set_position(u64::from(progress.cached_chunks));

        if progress.is_complete() {
            if let Some(bar) = bars.remove(&progress.url) {
                bar.finish_with_message(format!("Cached {}", progress.url));
            }
        }
    }

    /// Abandon bars of transfers that never completed
    pub fn finish(&self) {
        for (url, bar) in self.bars.lock().drain() {
            bar.abandon_with_message(format!("Not cached {url}"));
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}
