use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{LookupService, SearchResult};
use crate::error::ResolveError;

const CANNED: &[(&str, &str, &str)] = &[
    ("dQw4w9WgXcQ", "Never Gonna Give You Up", "Rick Astley"),
    ("9bZkp7q19f0", "Gangnam Style", "officialpsy"),
    ("kJQP7kiw5Fk", "Despacito", "Luis Fonsi"),
    ("fJ9rUzIMcZQ", "Bohemian Rhapsody", "Queen Official"),
    ("hTWKbfoikeg", "Smells Like Teen Spirit", "Nirvana"),
];

/// Fuente sin red para desarrollo y pruebas (`PLAYCACHE_MOCK_MODE=1`).
#[derive(Debug, Default)]
pub struct MockSource {
    latency: Duration,
    searches: AtomicUsize,
    resolutions: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn canned(id: &str, title: &str, channel: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: title.to_string(),
            channel: channel.to_string(),
            thumbnail_url: format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id),
            description: String::new(),
        }
    }
}

#[async_trait]
impl LookupService for MockSource {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ResolveError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let needle = query.trim().to_lowercase();
        let matching: Vec<SearchResult> = CANNED
            .iter()
            .filter(|(_, title, channel)| {
                title.to_lowercase().contains(&needle) || channel.to_lowercase().contains(&needle)
            })
            .map(|(id, title, channel)| Self::canned(id, title, channel))
            .collect();

        let results = if matching.is_empty() {
            CANNED
                .iter()
                .map(|(id, title, channel)| Self::canned(id, title, channel))
                .collect()
        } else {
            matching
        };

        Ok(results.into_iter().take(limit).collect())
    }

    async fn resolve_stream(&self, item_id: &str) -> Result<String, ResolveError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if item_id.is_empty() {
            return Err(ResolveError::NotFound(item_id.to_string()));
        }
        Ok(format!("https://mock.invalid/stream/{}.m4a", item_id))
    }

    async fn download(&self, item_id: &str, dest: &Path) -> Result<(), ResolveError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        debug!("mock download {} -> {}", item_id, dest.display());
        tokio::fs::write(dest, format!("mock audio for {}", item_id))
            .await
            .map_err(ResolveError::transient)
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_filters_and_limits() {
        let source = MockSource::new();
        let results = source.search("queen", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "fJ9rUzIMcZQ");

        let results = source.search("zzz no match", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(source.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.part");
        let source = MockSource::new();
        source.download("dQw4w9WgXcQ", &dest).await.unwrap();
        assert!(dest.exists());
        assert_eq!(source.download_calls(), 1);
    }
}
