use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Una entrada persistida del caché.
///
/// `stored_at <= last_accessed` always holds; `size_bytes` is the on-disk
/// size and only matters for byte-bounded stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub size_bytes: u64,
    /// Last hit served for playback. Only read by [`Recency::LastServed`] stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_served: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, now: DateTime<Utc>, size_bytes: u64) -> Self {
        Self {
            value,
            stored_at: now,
            last_accessed: now,
            access_count: 0,
            size_bytes,
            last_served: None,
        }
    }

    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        let age = now.signed_duration_since(self.stored_at);
        match age.to_std() {
            Ok(age) => age >= ttl,
            // stored_at in the future (clock went backwards): not expired
            Err(_) => false,
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed {
            self.last_accessed = now;
        }
        self.access_count = self.access_count.saturating_add(1);
    }
}

/// Qué señal de uso ordena el desalojo LRU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recency {
    /// Any hit refreshes the entry.
    #[default]
    LastAccess,
    /// Only hits served for playback count; never-served entries go first.
    LastServed,
}

/// Normalización de claves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// Stable identifiers (item ids, URLs): used verbatim.
    #[default]
    Identifier,
    /// User-typed text: trimmed and case-folded.
    FreeText,
}

impl KeyPolicy {
    pub fn normalize(&self, key: &str) -> String {
        match self {
            KeyPolicy::Identifier => key.to_string(),
            KeyPolicy::FreeText => key.trim().to_lowercase(),
        }
    }
}

/// Políticas de un almacén. Un límite `None` es infinito.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheConfig {
    pub ttl: Option<Duration>,
    pub max_entries: Option<u32>,
    pub max_total_bytes: Option<u64>,
    pub recency: Recency,
    pub keys: KeyPolicy,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_max_total_bytes(mut self, max_total_bytes: u64) -> Self {
        self.max_total_bytes = Some(max_total_bytes);
        self
    }

    pub fn with_recency(mut self, recency: Recency) -> Self {
        self.recency = recency;
        self
    }

    pub fn with_keys(mut self, keys: KeyPolicy) -> Self {
        self.keys = keys;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some() || self.max_total_bytes.is_some()
    }

    pub(crate) fn over_capacity(&self, count: usize, total_bytes: u64) -> bool {
        let over_count = self
            .max_entries
            .is_some_and(|max| count > max as usize);
        let over_bytes = self.max_total_bytes.is_some_and(|max| total_bytes > max);
        over_count || over_bytes
    }
}

/// Resultado observable de una lectura.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    pub fn hit(self) -> Option<V> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::Miss => Lookup::Miss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(secs)
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new("url", at(0), 3);
        let ttl = Some(Duration::from_secs(3600));
        assert!(!entry.is_expired(ttl, at(3599)));
        assert!(entry.is_expired(ttl, at(3600)));
        assert!(!entry.is_expired(None, at(1_000_000)));
    }

    #[test]
    fn test_free_text_keys_are_folded() {
        assert_eq!(KeyPolicy::FreeText.normalize("  Daft PUNK "), "daft punk");
        assert_eq!(KeyPolicy::Identifier.normalize(" AbC "), " AbC ");
    }

    #[test]
    fn test_capacity_checks_only_finite_bounds() {
        let unbounded = CacheConfig::new();
        assert!(!unbounded.over_capacity(10_000, u64::MAX));

        let config = CacheConfig::new().with_max_entries(2).with_max_total_bytes(100);
        assert!(!config.over_capacity(2, 100));
        assert!(config.over_capacity(3, 10));
        assert!(config.over_capacity(1, 101));
    }

    #[test]
    fn test_touch_keeps_invariant() {
        let mut entry = CacheEntry::new(1u8, at(10), 1);
        entry.touch(at(5));
        assert!(entry.stored_at <= entry.last_accessed);
        assert_eq!(entry.access_count, 1);
    }
}
