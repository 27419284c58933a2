use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{LookupService, MockSource, SearchResult, YouTubeApiV3Client, YtDlpClient};
use crate::config::Config;
use crate::error::ResolveError;

const API_TIMEOUT: Duration = Duration::from_secs(5);

/// Fuente con fallback jerárquico: la API oficial primero para búsquedas y
/// yt-dlp para todo lo demás.
pub struct SmartSource {
    primary: Option<Box<dyn LookupService>>,
    fallback: Box<dyn LookupService>,
}

impl SmartSource {
    pub fn new(primary: Option<Box<dyn LookupService>>, fallback: Box<dyn LookupService>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_config(config: &Config) -> Self {
        let ytdlp = YtDlpClient::new(
            config.ytdlp_binary.clone(),
            config.resolve_timeout,
            config.download_timeout,
        );

        let primary: Option<Box<dyn LookupService>> = match &config.youtube_api_key {
            Some(key) => match YouTubeApiV3Client::new(key.clone(), API_TIMEOUT) {
                Ok(client) => {
                    info!("🔑 YouTube API v3 configurado");
                    Some(Box::new(client))
                }
                Err(e) => {
                    warn!("⚠️ YouTube API v3 disabled: {}", e);
                    None
                }
            },
            None => {
                info!("ℹ️ YOUTUBE_API_KEY no configurado, usando solo yt-dlp");
                None
            }
        };

        Self::new(primary, Box::new(ytdlp))
    }
}

/// Builds the lookup service for this run: canned data in mock mode,
/// otherwise the API + yt-dlp fallback chain.
pub fn lookup_from_config(config: &Config) -> Arc<dyn LookupService> {
    if config.mock_mode {
        info!("🧪 Mock mode: using canned lookup data");
        Arc::new(MockSource::new())
    } else {
        Arc::new(SmartSource::from_config(config))
    }
}

#[async_trait]
impl LookupService for SmartSource {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ResolveError> {
        if let Some(primary) = &self.primary {
            let start = Instant::now();
            match primary.search(query, limit).await {
                Ok(results) if !results.is_empty() => {
                    info!(
                        "✅ {}: {} results in {:?}",
                        primary.source_name(),
                        results.len(),
                        start.elapsed()
                    );
                    return Ok(results);
                }
                Ok(_) => warn!("⚠️ {} returned 0 results", primary.source_name()),
                Err(e) => warn!("❌ {} failed: {}", primary.source_name(), e),
            }
        }

        self.fallback.search(query, limit).await
    }

    async fn resolve_stream(&self, item_id: &str) -> Result<String, ResolveError> {
        self.fallback.resolve_stream(item_id).await
    }

    async fn download(&self, item_id: &str, dest: &Path) -> Result<(), ResolveError> {
        self.fallback.download(item_id, dest).await
    }

    fn source_name(&self) -> &'static str {
        "smart"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockLookupService;

    fn result(id: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: format!("title {id}"),
            channel: "channel".to_string(),
            thumbnail_url: String::new(),
            description: String::new(),
        }
    }

    fn named(mut mock: MockLookupService, name: &'static str) -> MockLookupService {
        mock.expect_source_name().return_const(name);
        mock
    }

    #[tokio::test]
    async fn test_primary_results_win() {
        let mut primary = MockLookupService::new();
        primary
            .expect_search()
            .times(1)
            .returning(|_, _| Ok(vec![result("api")]));
        let mut fallback = MockLookupService::new();
        fallback.expect_search().never();

        let source = SmartSource::new(
            Some(Box::new(named(primary, "api"))),
            Box::new(named(fallback, "ytdlp")),
        );
        let results = source.search("song", 5).await.unwrap();
        assert_eq!(results[0].id, "api");
    }

    #[tokio::test]
    async fn test_falls_back_on_error_and_empty() {
        let mut primary = MockLookupService::new();
        let mut calls = 0;
        primary.expect_search().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(ResolveError::Unavailable("quota".to_string()))
            } else {
                Ok(Vec::new())
            }
        });
        let mut fallback = MockLookupService::new();
        fallback
            .expect_search()
            .times(2)
            .returning(|_, _| Ok(vec![result("ytdlp")]));

        let source = SmartSource::new(
            Some(Box::new(named(primary, "api"))),
            Box::new(named(fallback, "ytdlp")),
        );
        assert_eq!(source.search("song", 5).await.unwrap()[0].id, "ytdlp");
        assert_eq!(source.search("song", 5).await.unwrap()[0].id, "ytdlp");
    }

    #[tokio::test]
    async fn test_resolution_always_uses_fallback() {
        let mut fallback = MockLookupService::new();
        fallback
            .expect_resolve_stream()
            .withf(|id| id == "abc")
            .returning(|_| Ok("https://stream/abc".to_string()));

        let source = SmartSource::new(None, Box::new(fallback));
        assert_eq!(source.resolve_stream("abc").await.unwrap(), "https://stream/abc");
    }

    #[test]
    fn test_mock_mode_selects_mock_source() {
        let config = Config {
            mock_mode: true,
            ..Config::default()
        };
        assert_eq!(lookup_from_config(&config).source_name(), "mock");
    }
}
