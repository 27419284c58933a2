use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::sources::SearchResult;

/// Lee un documento JSON completo.
///
/// `Ok(None)` when the file does not exist; a file that exists but cannot be
/// parsed is reported as [`CacheError::CorruptState`] so callers can decide to
/// start empty.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CacheError::CorruptState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Escribe un documento JSON completo de forma atómica (temp + rename).
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CacheError> {
    let content = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    let io_err = |source: std::io::Error| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
    file.write_all(&content).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

const MAX_HISTORY: usize = 50;

/// Una canción reproducida recientemente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub item_id: String,
    pub title: String,
    pub channel: String,
    pub thumbnail_url: String,
    pub played_at: DateTime<Utc>,
}

/// Historial de reproducción persistido en `history.json`.
pub struct PlayHistory {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl PlayHistory {
    pub fn open(path: PathBuf) -> Self {
        let entries = match read_json::<Vec<HistoryEntry>>(&path) {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Discarding unreadable play history: {}", e);
                Vec::new()
            }
        };

        info!("📜 Play history loaded: {} songs", entries.len());
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Moves the item to the front of the history, keeping the last 50.
    pub fn add(&self, result: &SearchResult) {
        let mut entries = self.entries.lock();
        entries.retain(|h| h.item_id != result.id);
        entries.insert(
            0,
            HistoryEntry {
                item_id: result.id.clone(),
                title: result.title.clone(),
                channel: result.channel.clone(),
                thumbnail_url: result.thumbnail_url.clone(),
                played_at: Utc::now(),
            },
        );
        entries.truncate(MAX_HISTORY);

        if let Err(e) = write_json_atomic(&self.path, &*entries) {
            warn!("Could not save play history: {}", e);
        } else {
            debug!("History updated with {}", result.id);
        }
    }

    pub fn recent(&self, count: usize) -> Vec<HistoryEntry> {
        self.entries.lock().iter().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(id: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: format!("Song {id}"),
            channel: "Channel".to_string(),
            thumbnail_url: format!("https://img.example/{id}.jpg"),
            description: String::new(),
        }
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<Vec<u8>> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = read_json::<Vec<u8>>(&path).unwrap_err();
        assert!(matches!(err, CacheError::CorruptState { .. }));
    }

    #[test]
    fn test_atomic_write_roundtrip_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        assert_eq!(read_json::<Vec<i32>>(&path).unwrap(), Some(vec![1, 2, 3]));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_history_moves_replayed_song_to_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let history = PlayHistory::open(path.clone());

        history.add(&result("a"));
        history.add(&result("b"));
        history.add(&result("a"));

        let ids: Vec<String> = history.recent(10).into_iter().map(|h| h.item_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let reopened = PlayHistory::open(path);
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_history_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let history = PlayHistory::open(dir.path().join("history.json"));
        for i in 0..60 {
            history.add(&result(&i.to_string()));
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history.recent(1)[0].item_id, "59");
    }
}
