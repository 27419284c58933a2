use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use crate::error::CacheError;
use crate::storage::{read_json, write_json_atomic};

pub type Entries<T> = BTreeMap<String, CacheEntry<T>>;

const INDEX_FILE: &str = "index.json";
const PARTIAL_EXTENSION: &str = "part";

/// Dónde y cómo un [`super::store::KeyedStore`] persiste sus entradas.
pub trait StoreBackend: Send + Sync + 'static {
    type Stored: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Human readable location, for logs.
    fn location(&self) -> &Path;

    /// Loads persisted entries. A missing file is an empty store.
    fn load(&self) -> Result<Entries<Self::Stored>, CacheError>;

    fn persist(&self, entries: &Entries<Self::Stored>) -> Result<(), CacheError>;

    /// Whether the data behind the entry is still there.
    fn is_intact(&self, _entry: &CacheEntry<Self::Stored>) -> bool {
        true
    }

    /// Releases whatever the entry owns outside the index.
    fn discard(&self, _entry: &CacheEntry<Self::Stored>) {}
}

/// Un único documento JSON con todas las entradas (valores escalares).
#[derive(Debug)]
pub struct JsonDocument<V> {
    path: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> JsonDocument<V> {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _value: PhantomData,
        }
    }
}

impl<V> StoreBackend for JsonDocument<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Stored = V;

    fn location(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Entries<V>, CacheError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn persist(&self, entries: &Entries<V>) -> Result<(), CacheError> {
        write_json_atomic(&self.path, entries)
    }
}

/// Metadata kept in the blob index for one cached file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub file_name: String,
}

/// Un directorio con un fichero por entrada más `index.json`.
///
/// File names are derived from the key with SHA-256 so arbitrary keys (URLs,
/// ids with odd characters) never reach the filesystem.
#[derive(Debug)]
pub struct BlobDirectory {
    dir: PathBuf,
    index_path: PathBuf,
    extension: &'static str,
}

impl BlobDirectory {
    pub fn new(dir: PathBuf, extension: &'static str) -> Self {
        let index_path = dir.join(INDEX_FILE);
        Self {
            dir,
            index_path,
            extension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name_for(&self, key: &str) -> String {
        format!("{}.{}", hash_key(key), self.extension)
    }

    pub fn blob_path(&self, record: &BlobRecord) -> PathBuf {
        self.dir.join(&record.file_name)
    }

    /// Scratch location for a blob still being produced (e.g. a download).
    pub fn partial_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hash_key(key), PARTIAL_EXTENSION))
    }

    /// Writes `data` as the blob for `key` through a partial file renamed into
    /// place. On failure the previous blob, if any, is untouched.
    pub fn write_blob(&self, key: &str, data: &[u8]) -> Result<BlobRecord, CacheError> {
        let record = BlobRecord {
            file_name: self.file_name_for(key),
        };
        let path = self.blob_path(&record);
        let partial = self.partial_path(key);

        let result = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::File::create(&partial))
            .and_then(|mut file| {
                file.write_all(data)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&partial, &path));

        if let Err(source) = result {
            let _ = fs::remove_file(&partial);
            return Err(CacheError::BlobWrite { path, source });
        }

        Ok(record)
    }

    /// Moves an already written file into the store as the blob for `key`.
    pub fn adopt_file(&self, key: &str, src: &Path) -> Result<(BlobRecord, u64), CacheError> {
        let record = BlobRecord {
            file_name: self.file_name_for(key),
        };
        let path = self.blob_path(&record);
        let blob_err = |source: std::io::Error| CacheError::BlobWrite {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(blob_err)?;

        if src != path {
            if let Err(rename_err) = fs::rename(src, &path) {
                // cross-device moves fall back to copy + delete
                debug!("rename failed ({}), copying {}", rename_err, src.display());
                if let Err(source) = fs::copy(src, &path) {
                    let _ = fs::remove_file(&path);
                    return Err(blob_err(source));
                }
                let _ = fs::remove_file(src);
            }
        }

        let size = fs::metadata(&path).map_err(blob_err)?.len();
        Ok((record, size))
    }

    fn sweep_partials(&self) {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return;
        };

        let mut removed = 0;
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == PARTIAL_EXTENSION) {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Could not remove stale partial {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("🧹 Removed {} stale partial files from {}", removed, self.dir.display());
        }
    }
}

impl StoreBackend for BlobDirectory {
    type Stored = BlobRecord;

    fn location(&self) -> &Path {
        &self.dir
    }

    fn load(&self) -> Result<Entries<BlobRecord>, CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        self.sweep_partials();

        let mut entries: Entries<BlobRecord> = read_json(&self.index_path)?.unwrap_or_default();
        let before = entries.len();
        entries.retain(|_, entry| self.is_intact(entry));
        if entries.len() < before {
            warn!(
                "Dropped {} index entries without a backing file in {}",
                before - entries.len(),
                self.dir.display()
            );
        }

        Ok(entries)
    }

    fn persist(&self, entries: &Entries<BlobRecord>) -> Result<(), CacheError> {
        write_json_atomic(&self.index_path, entries)
    }

    fn is_intact(&self, entry: &CacheEntry<BlobRecord>) -> bool {
        self.blob_path(&entry.value).is_file()
    }

    fn discard(&self, entry: &CacheEntry<BlobRecord>) {
        let path = self.blob_path(&entry.value);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not delete cached file {}: {}", path.display(), e),
        }
    }
}

fn hash_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_file_names_are_deterministic_and_safe() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobDirectory::new(dir.path().to_path_buf(), "jpg");
        let a = blobs.file_name_for("https://i.ytimg.com/vi/abc/hqdefault.jpg?x=1&y=2");
        let b = blobs.file_name_for("https://i.ytimg.com/vi/abc/hqdefault.jpg?x=1&y=2");
        assert_eq!(a, b);
        assert!(a.ends_with(".jpg"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '.'));
    }

    #[test]
    fn test_load_drops_orphans_and_partials() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobDirectory::new(dir.path().to_path_buf(), "m4a");

        let record = blobs.write_blob("kept", b"abc").unwrap();
        let mut entries = Entries::new();
        entries.insert("kept".to_string(), CacheEntry::new(record, Utc::now(), 3));
        entries.insert(
            "orphan".to_string(),
            CacheEntry::new(
                BlobRecord {
                    file_name: blobs.file_name_for("orphan"),
                },
                Utc::now(),
                3,
            ),
        );
        blobs.persist(&entries).unwrap();
        fs::write(blobs.partial_path("half"), b"partial").unwrap();

        let loaded = blobs.load().unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["kept"]);
        assert!(!blobs.partial_path("half").exists());
    }

    #[test]
    fn test_failed_overwrite_keeps_previous_blob() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobDirectory::new(dir.path().to_path_buf(), "jpg");
        let record = blobs.write_blob("thumb", b"first").unwrap();

        // a directory squatting on the partial path makes the write fail
        fs::create_dir(blobs.partial_path("thumb")).unwrap();
        let err = blobs.write_blob("thumb", b"second").unwrap_err();

        assert!(matches!(err, CacheError::BlobWrite { .. }));
        assert_eq!(fs::read(blobs.blob_path(&record)).unwrap(), b"first");
    }

    #[test]
    fn test_adopt_file_moves_source() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobDirectory::new(dir.path().join("audio"), "m4a");
        let src = dir.path().join("download.tmp");
        fs::write(&src, vec![7u8; 64]).unwrap();

        let (record, size) = blobs.adopt_file("vid", &src).unwrap();
        assert_eq!(size, 64);
        assert!(!src.exists());
        assert!(blobs.blob_path(&record).is_file());
    }

    #[test]
    fn test_adopt_missing_file_is_blob_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobDirectory::new(dir.path().to_path_buf(), "m4a");
        let err = blobs.adopt_file("vid", &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, CacheError::BlobWrite { .. }));
    }
}
