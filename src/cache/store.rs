use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{Entries, StoreBackend};
use super::clock::Clock;
use super::entry::{CacheConfig, CacheEntry, Lookup, Recency};
use crate::error::CacheError;

/// Almacén clave/valor persistente con TTL y desalojo LRU acotado.
///
/// Every mutation happens under one lock and is persisted before the lock is
/// released, so writes to a store are linearized. The in-memory map is the
/// source of truth: if the index cannot be written the store keeps working and
/// logs the failure.
pub struct KeyedStore<B: StoreBackend> {
    name: &'static str,
    config: CacheConfig,
    backend: B,
    clock: Arc<dyn Clock>,
    entries: Mutex<Entries<B::Stored>>,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

/// Métricas básicas del cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

type RecencyKey<'a> = (u8, DateTime<Utc>, DateTime<Utc>, &'a str);

impl<B: StoreBackend> KeyedStore<B> {
    /// Opens the store, starting empty when the persisted state is missing or
    /// unreadable.
    pub fn open(name: &'static str, config: CacheConfig, backend: B, clock: Arc<dyn Clock>) -> Self {
        let entries = match backend.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}: discarding persisted state ({})", name, e);
                Entries::new()
            }
        };

        info!(
            "📦 {} ready at {} with {} entries",
            name,
            backend.location().display(),
            entries.len()
        );

        Self {
            name,
            config,
            backend,
            clock,
            entries: Mutex::new(entries),
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn normalize_key(&self, key: &str) -> String {
        self.config.keys.normalize(key)
    }

    /// Reads `key`, refreshing its recency on a hit.
    pub fn get(&self, key: &str) -> Lookup<B::Stored> {
        self.lookup(key, false)
    }

    /// Like [`get`](Self::get), and also records the hit as served for
    /// playback (the recency signal of [`Recency::LastServed`] stores).
    pub fn get_for_playback(&self, key: &str) -> Lookup<B::Stored> {
        self.lookup(key, true)
    }

    fn lookup(&self, key: &str, served: bool) -> Lookup<B::Stored> {
        let key = self.normalize_key(key);
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get(&key) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!("{} miss: {}", self.name, key);
            return Lookup::Miss;
        };

        let expired = entry.is_expired(self.config.ttl, now);
        if expired || !self.backend.is_intact(entry) {
            if let Some(entry) = entries.remove(&key) {
                self.backend.discard(&entry);
            }
            self.persist(&entries);
            if expired {
                self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
                debug!("{} evicted expired entry: {}", self.name, key);
            } else {
                warn!("{} entry lost its backing data: {}", self.name, key);
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Lookup::Miss;
        }

        let Some(entry) = entries.get_mut(&key) else {
            return Lookup::Miss;
        };
        entry.touch(now);
        if served {
            entry.last_served = Some(entry.last_accessed);
        }
        let value = entry.value.clone();
        let access_count = entry.access_count;

        self.persist(&entries);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        info!("{} hit: {} (#{})", self.name, key, access_count);
        Lookup::Hit(value)
    }

    /// Non-mutating read: no recency update, expired entries are reported as
    /// absent but left for the next `get` or sweep.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<B::Stored>> {
        let key = self.normalize_key(key);
        let now = self.clock.now();
        let entries = self.entries.lock();
        entries
            .get(&key)
            .filter(|entry| !entry.is_expired(self.config.ttl, now) && self.backend.is_intact(entry))
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Stores `value`, sized by its serialized length.
    pub fn set(&self, key: &str, value: B::Stored) {
        let size = serde_json::to_vec(&value)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or_default();
        // infallible producer: only blob writes can fail
        let _ = self.set_with(key, |_, _| Ok((value, size)));
    }

    /// Stores the value produced by `produce`, which runs under the store
    /// lock with the normalized key. If it fails nothing is recorded.
    pub fn set_with<F>(&self, key: &str, produce: F) -> Result<(), CacheError>
    where
        F: FnOnce(&B, &str) -> Result<(B::Stored, u64), CacheError>,
    {
        self.write_entry(key, produce, false)
    }

    /// Like [`set_with`](Self::set_with), and also records the write as
    /// served for playback (a file downloaded while its stream played).
    pub fn set_served_with<F>(&self, key: &str, produce: F) -> Result<(), CacheError>
    where
        F: FnOnce(&B, &str) -> Result<(B::Stored, u64), CacheError>,
    {
        self.write_entry(key, produce, true)
    }

    fn write_entry<F>(&self, key: &str, produce: F, served: bool) -> Result<(), CacheError>
    where
        F: FnOnce(&B, &str) -> Result<(B::Stored, u64), CacheError>,
    {
        let key = self.normalize_key(key);
        let mut entries = self.entries.lock();

        let (value, size_bytes) = produce(&self.backend, &key)?;
        let now = self.clock.now();
        let mut entry = CacheEntry::new(value, now, size_bytes);
        if let Some(previous) = entries.get(&key) {
            entry.access_count = previous.access_count;
            entry.last_served = previous.last_served;
        }
        if served {
            entry.last_served = Some(now);
        }
        entries.insert(key.clone(), entry);
        self.persist(&entries);
        debug!("{} set: {} ({} bytes)", self.name, key, size_bytes);

        if self.enforce_limits(&mut entries, &key) > 0 {
            self.persist(&entries);
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> bool {
        let key = self.normalize_key(key);
        let mut entries = self.entries.lock();
        match entries.remove(&key) {
            Some(entry) => {
                self.backend.discard(&entry);
                self.persist(&entries);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.values() {
            self.backend.discard(entry);
        }
        entries.clear();
        self.persist(&entries);
        info!("{} cleared", self.name);
    }

    /// Removes every entry whose TTL has elapsed. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        if self.config.ttl.is_none() {
            return 0;
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.config.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = entries.remove(key) {
                self.backend.discard(&entry);
            }
        }

        if !expired.is_empty() {
            self.persist(&entries);
            self.counters
                .expired_removals
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            info!("🧹 {} cleared {} expired entries", self.name, expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.lock().values().map(|e| e.size_bytes).sum()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }

    fn recency_key<'a>(&self, key: &'a str, entry: &CacheEntry<B::Stored>) -> RecencyKey<'a> {
        match (self.config.recency, entry.last_served) {
            (Recency::LastAccess, _) => (0, entry.last_accessed, entry.stored_at, key),
            (Recency::LastServed, None) => (0, entry.stored_at, entry.stored_at, key),
            (Recency::LastServed, Some(served)) => (1, served, entry.stored_at, key),
        }
    }

    /// Evicts until within bounds. `written` goes last: it is only chosen
    /// when it alone still exceeds the limits.
    fn enforce_limits(&self, entries: &mut Entries<B::Stored>, written: &str) -> usize {
        let mut total: u64 = entries.values().map(|e| e.size_bytes).sum();
        let mut evicted = 0usize;
        let mut freed = 0u64;

        while self.config.over_capacity(entries.len(), total) {
            let victim = entries
                .iter()
                .filter(|(key, _)| key.as_str() != written)
                .min_by(|(ka, ea), (kb, eb)| {
                    self.recency_key(ka, ea).cmp(&self.recency_key(kb, eb))
                })
                .map(|(key, _)| key.clone())
                .or_else(|| entries.contains_key(written).then(|| written.to_string()));

            let Some(victim) = victim else {
                break;
            };
            if let Some(entry) = entries.remove(&victim) {
                total = total.saturating_sub(entry.size_bytes);
                freed += entry.size_bytes;
                self.backend.discard(&entry);
                evicted += 1;
                debug!("{} evicted {} (LRU)", self.name, victim);
            }
        }

        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            info!(
                "{} evicted {} entries ({:.1} MB) - LRU cleanup",
                self.name,
                evicted,
                freed as f64 / 1024.0 / 1024.0
            );
        }
        evicted
    }

    fn persist(&self, entries: &Entries<B::Stored>) {
        if let Err(e) = self.backend.persist(entries) {
            warn!("{}: could not persist index, keeping in-memory state: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{BlobDirectory, JsonDocument};
    use crate::cache::clock::ManualClock;
    use crate::cache::entry::KeyPolicy;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn scalar_store(
        dir: &std::path::Path,
        config: CacheConfig,
        clock: Arc<ManualClock>,
    ) -> KeyedStore<JsonDocument<i64>> {
        KeyedStore::open(
            "TestCache",
            config,
            JsonDocument::new(dir.join("values.json")),
            clock,
        )
    }

    #[test]
    fn test_unset_key_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = scalar_store(dir.path(), CacheConfig::new(), Arc::new(ManualClock::at_epoch()));
        assert_eq!(store.get("never-set"), Lookup::Miss);
        assert_eq!(store.metrics().misses, 1);
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = scalar_store(dir.path(), CacheConfig::new(), Arc::new(ManualClock::at_epoch()));
        store.set("k", 42);
        assert_eq!(store.get("k"), Lookup::Hit(42));
        assert_eq!(store.metrics().hits, 1);
    }

    #[test]
    fn test_lru_scenario_evicts_least_recently_accessed() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = scalar_store(
            dir.path(),
            CacheConfig::new().with_max_entries(2),
            clock.clone(),
        );

        clock.set_secs(0);
        store.set("a", 1);
        clock.set_secs(1);
        store.set("b", 2);
        clock.set_secs(2);
        assert_eq!(store.get("a"), Lookup::Hit(1));
        clock.set_secs(3);
        store.set("c", 3);

        assert_eq!(store.keys(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(store.metrics().evictions, 1);
    }

    #[test]
    fn test_ttl_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = KeyedStore::open(
            "UrlCache",
            CacheConfig::new().with_ttl(Duration::from_secs(3600)),
            JsonDocument::<String>::new(dir.path().join("urls.json")),
            clock.clone(),
        );

        store.set("x", "https://cdn.example/x".to_string());
        clock.set_secs(3599);
        assert_eq!(store.get("x"), Lookup::Hit("https://cdn.example/x".to_string()));
        assert_eq!(store.len(), 1);

        clock.set_secs(3601);
        assert_eq!(store.get("x"), Lookup::Miss);
        assert_eq!(store.len(), 0);
        assert_eq!(store.metrics().expired_removals, 1);
    }

    #[test]
    fn test_evict_expired_is_idempotent_and_noop_without_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = scalar_store(
            dir.path(),
            CacheConfig::new().with_ttl(Duration::from_secs(10)),
            clock.clone(),
        );
        store.set("old", 1);
        clock.set_secs(5);
        store.set("new", 2);
        clock.set_secs(12);

        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.evict_expired(), 0);
        assert_eq!(store.keys(), vec!["new".to_string()]);

        let forever = scalar_store(dir.path(), CacheConfig::new(), clock.clone());
        clock.set_secs(1_000_000);
        assert_eq!(forever.evict_expired(), 0);
    }

    #[test]
    fn test_capacity_invariant_holds_after_every_set() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let config = CacheConfig::new().with_max_entries(3).with_max_total_bytes(12);
        let store = scalar_store(dir.path(), config, clock.clone());

        for i in 0..20i64 {
            clock.set_secs(i);
            // "1000" and friends serialize to 4 bytes
            store.set(&format!("k{i}"), 1000 + i);
            assert!(store.len() <= 3);
            assert!(store.total_bytes() <= 12);
        }
    }

    #[test]
    fn test_ties_break_on_stored_at_then_key() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = scalar_store(dir.path(), CacheConfig::new().with_max_entries(2), clock);

        // same clock instant for every write
        store.set("b", 1);
        store.set("a", 2);
        store.set("c", 3);
        assert_eq!(store.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_overwrite_preserves_access_count() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = scalar_store(dir.path(), CacheConfig::new(), clock.clone());
        store.set("k", 1);
        store.get("k");
        store.get("k");
        clock.set_secs(10);
        store.set("k", 2);

        let entry = store.peek("k").unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.stored_at, entry.last_accessed);
        assert_eq!(entry.value, 2);
    }

    #[test]
    fn test_free_text_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = scalar_store(
            dir.path(),
            CacheConfig::new().with_keys(KeyPolicy::FreeText),
            Arc::new(ManualClock::at_epoch()),
        );
        store.set("  Lo-Fi Beats ", 7);
        assert_eq!(store.get("lo-fi beats"), Lookup::Hit(7));
        assert_eq!(store.get("LO-FI BEATS"), Lookup::Hit(7));
    }

    #[test]
    fn test_state_survives_reopen_and_corruption_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        {
            let store = scalar_store(dir.path(), CacheConfig::new(), clock.clone());
            store.set("persisted", 5);
        }
        let reopened = scalar_store(dir.path(), CacheConfig::new(), clock.clone());
        assert_eq!(reopened.get("persisted"), Lookup::Hit(5));

        std::fs::write(dir.path().join("values.json"), b"\x00garbage").unwrap();
        let corrupt = scalar_store(dir.path(), CacheConfig::new(), clock);
        assert!(corrupt.is_empty());
        corrupt.set("fresh", 1);
        assert_eq!(corrupt.get("fresh"), Lookup::Hit(1));
    }

    #[test]
    fn test_metadata_persist_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // the document path is a directory, so every persist fails
        let doc = dir.path().join("blocked.json");
        std::fs::create_dir_all(&doc).unwrap();
        let store = KeyedStore::open(
            "Blocked",
            CacheConfig::new(),
            JsonDocument::<i64>::new(doc),
            Arc::new(ManualClock::at_epoch()),
        );
        store.set("k", 9);
        assert_eq!(store.get("k"), Lookup::Hit(9));
    }

    #[test]
    fn test_failed_blob_write_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyedStore::open(
            "Blobs",
            CacheConfig::new().with_max_entries(5),
            BlobDirectory::new(dir.path().join("blobs"), "bin"),
            Arc::new(ManualClock::at_epoch()),
        );

        let result = store.set_with("k", |_, _| {
            Err(CacheError::BlobWrite {
                path: "nowhere".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        });
        assert!(matches!(result, Err(CacheError::BlobWrite { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_blob_eviction_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = KeyedStore::open(
            "Blobs",
            CacheConfig::new().with_max_total_bytes(10),
            BlobDirectory::new(dir.path().join("blobs"), "bin"),
            clock.clone(),
        );

        store
            .set_with("first", |b, key| Ok((b.write_blob(key, &[1; 6])?, 6)))
            .unwrap();
        let first_path = store.backend().blob_path(&store.peek("first").unwrap().value);
        clock.set_secs(1);
        store
            .set_with("second", |b, key| Ok((b.write_blob(key, &[2; 6])?, 6)))
            .unwrap();

        assert_eq!(store.keys(), vec!["second".to_string()]);
        assert!(!first_path.exists());
    }

    #[test]
    fn test_last_served_recency_evicts_never_played_first() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = KeyedStore::open(
            "Media",
            CacheConfig::new()
                .with_max_entries(2)
                .with_recency(Recency::LastServed),
            JsonDocument::<String>::new(dir.path().join("media.json")),
            clock.clone(),
        );

        clock.set_secs(0);
        store.set("replayed", "a".into());
        clock.set_secs(10);
        assert!(store.get_for_playback("replayed").is_hit());
        clock.set_secs(20);
        store.set("never-played", "b".into());
        clock.set_secs(30);
        store.set("newest", "c".into());

        assert_eq!(store.keys(), vec!["newest".to_string(), "replayed".to_string()]);
    }

    #[test]
    fn test_new_entry_is_never_its_own_eviction_victim() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = KeyedStore::open(
            "Media",
            CacheConfig::new()
                .with_max_entries(2)
                .with_recency(Recency::LastServed),
            JsonDocument::<String>::new(dir.path().join("media.json")),
            clock.clone(),
        );

        store.set_served_with("a", |_, _| Ok(("a".into(), 1))).unwrap();
        clock.set_secs(10);
        store.set_served_with("b", |_, _| Ok(("b".into(), 1))).unwrap();
        clock.set_secs(20);
        store.set("unplayed", "c".into());

        assert_eq!(store.keys(), vec!["b".to_string(), "unplayed".to_string()]);
    }

    #[test]
    fn test_oversized_entry_is_still_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = scalar_store(dir.path(), CacheConfig::new().with_max_total_bytes(2), clock);
        store.set("huge", 123_456);
        assert!(store.is_empty());
    }
}
