use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::backend::{BlobDirectory, JsonDocument};
use super::clock::Clock;
use super::entry::{CacheConfig, Lookup};
use super::store::KeyedStore;
use crate::error::CacheError;
use crate::sources::SearchResult;

pub const URL_CACHE_FILE: &str = "audio_urls.json";
pub const SEARCH_CACHE_FILE: &str = "search_results.json";
pub const THUMBNAIL_DIR: &str = "thumbnails";
pub const AUDIO_DIR: &str = "audio";

/// URLs de stream resueltas, por id de item. Caducan en horas.
pub struct ResolvedUrlCache {
    store: KeyedStore<JsonDocument<String>>,
}

impl ResolvedUrlCache {
    pub fn open(root: &Path, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: KeyedStore::open(
                "AudioUrlCache",
                config,
                JsonDocument::new(root.join(URL_CACHE_FILE)),
                clock,
            ),
        }
    }

    pub fn get(&self, item_id: &str) -> Lookup<String> {
        self.store.get(item_id)
    }

    pub fn set(&self, item_id: &str, url: &str) {
        self.store.set(item_id, url.to_string());
    }

    pub fn store(&self) -> &KeyedStore<JsonDocument<String>> {
        &self.store
    }
}

/// Resultados de búsqueda por consulta (sin distinguir mayúsculas).
pub struct SearchCache {
    store: KeyedStore<JsonDocument<Vec<SearchResult>>>,
}

impl SearchCache {
    pub fn open(root: &Path, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: KeyedStore::open(
                "SearchCache",
                config,
                JsonDocument::new(root.join(SEARCH_CACHE_FILE)),
                clock,
            ),
        }
    }

    pub fn get(&self, query: &str) -> Lookup<Vec<SearchResult>> {
        self.store.get(query)
    }

    pub fn set(&self, query: &str, results: &[SearchResult]) {
        self.store.set(query, results.to_vec());
    }

    pub fn store(&self) -> &KeyedStore<JsonDocument<Vec<SearchResult>>> {
        &self.store
    }
}

/// Miniaturas sin procesar, un fichero por URL.
pub struct ThumbnailCache {
    store: KeyedStore<BlobDirectory>,
}

impl ThumbnailCache {
    pub fn open(root: &Path, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: KeyedStore::open(
                "ThumbnailCache",
                config,
                BlobDirectory::new(root.join(THUMBNAIL_DIR), "jpg"),
                clock,
            ),
        }
    }

    pub fn get(&self, url: &str) -> Lookup<Bytes> {
        let Lookup::Hit(record) = self.store.get(url) else {
            return Lookup::Miss;
        };

        let path = self.store.backend().blob_path(&record);
        match std::fs::read(&path) {
            Ok(data) => Lookup::Hit(Bytes::from(data)),
            Err(e) => {
                warn!("ThumbnailCache could not read {}: {}", path.display(), e);
                self.store.remove(url);
                Lookup::Miss
            }
        }
    }

    pub fn set(&self, url: &str, data: &[u8]) -> Result<(), CacheError> {
        self.store.set_with(url, |blobs, key| {
            let record = blobs.write_blob(key, data)?;
            Ok((record, data.len() as u64))
        })
    }

    pub fn store(&self) -> &KeyedStore<BlobDirectory> {
        &self.store
    }
}

/// Ficheros de audio completos para repetir sin red.
///
/// Sin TTL; el desalojo sigue la última reproducción servida, no la última
/// escritura.
pub struct MediaFileCache {
    store: KeyedStore<BlobDirectory>,
}

impl MediaFileCache {
    pub fn open(root: &Path, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: KeyedStore::open(
                "AudioFileCache",
                config,
                BlobDirectory::new(root.join(AUDIO_DIR), "m4a"),
                clock,
            ),
        }
    }

    /// Local file for `item_id`, counted as a play when found.
    pub fn get_path(&self, item_id: &str) -> Lookup<PathBuf> {
        self.store
            .get_for_playback(item_id)
            .map(|record| self.store.backend().blob_path(&record))
    }

    /// Presence check that does not count as a play.
    pub fn contains(&self, item_id: &str) -> bool {
        self.store.contains(item_id)
    }

    pub fn play_count(&self, item_id: &str) -> Option<u32> {
        self.store.peek(item_id).map(|entry| entry.access_count)
    }

    /// Where an in-progress download for `item_id` should be written.
    pub fn partial_path(&self, item_id: &str) -> PathBuf {
        let key = self.store.normalize_key(item_id);
        self.store.backend().partial_path(&key)
    }

    /// Moves a fully downloaded file into the cache. Returns its size.
    ///
    /// Downloads follow a streamed play, so the new file counts as served now.
    pub fn insert_file(&self, item_id: &str, src: &Path) -> Result<u64, CacheError> {
        let mut stored_size = 0;
        self.store.set_served_with(item_id, |blobs, key| {
            let (record, size) = blobs.adopt_file(key, src)?;
            stored_size = size;
            Ok((record, size))
        })?;
        info!(
            "AudioFileCache set: {} ({:.1} MB)",
            item_id,
            stored_size as f64 / 1024.0 / 1024.0
        );
        Ok(stored_size)
    }

    /// `(total_bytes, file_count)`
    pub fn usage(&self) -> (u64, usize) {
        (self.store.total_bytes(), self.store.len())
    }

    pub fn dir(&self) -> &Path {
        self.store.backend().dir()
    }

    pub fn store(&self) -> &KeyedStore<BlobDirectory> {
        &self.store
    }
}
