//! # Cache Module
//!
//! Durable, tiered caching for the player.
//!
//! Every tier is the same [`KeyedStore`] type configured with its own
//! [`CacheConfig`]. Stores persist themselves after each mutation and evict
//! synchronously at the end of every write.
//!
//! ## Tiers
//!
//! | tier | value | TTL | bounds | LRU signal |
//! |---|---|---|---|---|
//! | [`ResolvedUrlCache`] | stream URL | hours | entries | last access |
//! | [`SearchCache`] | result list | days | entries | last access |
//! | [`ThumbnailCache`] | image bytes | a week | files + bytes | last access |
//! | [`MediaFileCache`] | audio file | none | files + bytes | last played |
//!
//! ## Layout on disk
//!
//! ```text
//! $PLAYCACHE_CACHE_DIR/
//!   audio_urls.json
//!   search_results.json
//!   history.json
//!   thumbnails/index.json, <sha256>.jpg ...
//!   audio/index.json, <sha256>.m4a ..., <sha256>.part (in-flight downloads)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use playcache::cache::{CacheTiers, SystemClock};
//! use playcache::config::Config;
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let tiers = CacheTiers::open(&config, Arc::new(SystemClock));
//!
//! tiers.urls.set("dQw4w9WgXcQ", "https://rr1.example/audio");
//! if let Some(url) = tiers.urls.get("dQw4w9WgXcQ").hit() {
//!     println!("cached stream: {url}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod entry;
pub mod store;
pub mod tiers;

pub use backend::{BlobDirectory, BlobRecord, JsonDocument, StoreBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheConfig, CacheEntry, KeyPolicy, Lookup, Recency};
pub use store::{CacheMetrics, KeyedStore};
pub use tiers::{MediaFileCache, ResolvedUrlCache, SearchCache, ThumbnailCache};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;

const MB: u64 = 1024 * 1024;

/// The four cache instances, built once at startup and shared by handle.
#[derive(Clone)]
pub struct CacheTiers {
    pub urls: Arc<ResolvedUrlCache>,
    pub searches: Arc<SearchCache>,
    pub thumbnails: Arc<ThumbnailCache>,
    pub media: Arc<MediaFileCache>,
}

impl CacheTiers {
    pub fn open(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let root = config.cache_dir.as_path();

        let tiers = Self {
            urls: Arc::new(ResolvedUrlCache::open(root, url_policy(config), clock.clone())),
            searches: Arc::new(SearchCache::open(root, search_policy(config), clock.clone())),
            thumbnails: Arc::new(ThumbnailCache::open(
                root,
                thumbnail_policy(config),
                clock.clone(),
            )),
            media: Arc::new(MediaFileCache::open(root, media_policy(config), clock)),
        };

        info!("🗄️ Cache tiers opened under {}", root.display());
        tiers
    }

    /// Sweeps every tier for expired entries. Returns the number removed.
    pub fn evict_expired_all(&self) -> usize {
        self.urls.store().evict_expired()
            + self.searches.store().evict_expired()
            + self.thumbnails.store().evict_expired()
            + self.media.store().evict_expired()
    }

    /// Runs [`evict_expired_all`](Self::evict_expired_all) every `every`
    /// until `shutdown` is cancelled.
    pub fn spawn_maintenance(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let tiers = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = tiers.evict_expired_all();
                        if removed > 0 {
                            info!("🧹 Cache sweep: removed {} expired entries", removed);
                        }
                    }
                }
            }
            debug!("cache maintenance stopped");
        })
    }

    pub fn summary(&self) -> String {
        let (media_bytes, media_files) = self.media.usage();
        format!(
            "URLs: {} ({:.0}% hits) | searches: {} ({:.0}% hits) | thumbnails: {} ({:.1} MB) | audio: {} files ({:.1} MB)",
            self.urls.store().len(),
            self.urls.store().metrics().hit_rate() * 100.0,
            self.searches.store().len(),
            self.searches.store().metrics().hit_rate() * 100.0,
            self.thumbnails.store().len(),
            self.thumbnails.store().total_bytes() as f64 / MB as f64,
            media_files,
            media_bytes as f64 / MB as f64,
        )
    }
}

pub fn url_policy(config: &Config) -> CacheConfig {
    CacheConfig::new()
        .with_ttl(config.url_cache_ttl)
        .with_max_entries(config.url_cache_max_entries)
}

pub fn search_policy(config: &Config) -> CacheConfig {
    CacheConfig::new()
        .with_ttl(config.search_cache_ttl)
        .with_max_entries(config.search_cache_max_entries)
        .with_keys(KeyPolicy::FreeText)
}

pub fn thumbnail_policy(config: &Config) -> CacheConfig {
    CacheConfig::new()
        .with_ttl(config.thumbnail_cache_ttl)
        .with_max_entries(config.thumbnail_cache_max_files)
        .with_max_total_bytes(config.thumbnail_cache_max_mb.saturating_mul(MB))
}

pub fn media_policy(config: &Config) -> CacheConfig {
    CacheConfig::new()
        .with_max_entries(config.audio_cache_max_files)
        .with_max_total_bytes(config.audio_cache_max_mb.saturating_mul(MB))
        .with_recency(Recency::LastServed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            cache_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_policies() {
        let config = Config::default();
        let media = media_policy(&config);
        assert_eq!(media.ttl, None);
        assert_eq!(media.recency, Recency::LastServed);
        assert_eq!(media.max_total_bytes, Some(500 * MB));

        let thumbs = thumbnail_policy(&config);
        assert_eq!(thumbs.max_entries, Some(200));
        assert_eq!(thumbs.max_total_bytes, Some(50 * MB));

        assert_eq!(search_policy(&config).keys, KeyPolicy::FreeText);
        assert_eq!(url_policy(&config).ttl, Some(Duration::from_secs(6 * 3600)));
    }

    #[test]
    fn test_huge_size_limits_saturate() {
        let config = Config {
            audio_cache_max_mb: u64::MAX / 2,
            thumbnail_cache_max_mb: u64::MAX,
            ..Config::default()
        };
        assert_eq!(media_policy(&config).max_total_bytes, Some(u64::MAX));
        assert_eq!(thumbnail_policy(&config).max_total_bytes, Some(u64::MAX));
    }

    #[test]
    fn test_sweep_spans_all_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let tiers = CacheTiers::open(&test_config(dir.path()), clock.clone());

        tiers.urls.set("a", "https://x/a");
        tiers.searches.set("query", &[]);
        tiers.thumbnails.set("https://img/a.jpg", b"img").unwrap();

        clock.advance(Duration::from_secs(30 * 24 * 3600));
        assert_eq!(tiers.evict_expired_all(), 3);
        assert_eq!(tiers.evict_expired_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_task_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let tiers = CacheTiers::open(&test_config(dir.path()), Arc::new(ManualClock::at_epoch()));
        let token = CancellationToken::new();
        let handle = tiers.spawn_maintenance(Duration::from_secs(60), token.clone());

        tokio::time::sleep(Duration::from_secs(180)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
