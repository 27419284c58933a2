use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{LookupService, SearchResult};
use crate::error::ResolveError;

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<ApiVideo>,
}

#[derive(Debug, Deserialize)]
struct ApiVideo {
    id: ApiVideoId,
    snippet: ApiSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVideoId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSnippet {
    title: String,
    channel_title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: ApiThumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct ApiThumbnails {
    medium: Option<ApiThumbnail>,
    high: Option<ApiThumbnail>,
    default: Option<ApiThumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiThumbnail {
    url: String,
}

/// Cliente de la YouTube Data API v3. Solo busca; resolver y descargar
/// quedan para yt-dlp.
pub struct YouTubeApiV3Client {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl YouTubeApiV3Client {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            endpoint: SEARCH_ENDPOINT.to_string(),
            client,
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Decodes a `search.list` response body into results, skipping channel and
/// playlist hits that carry no video id.
fn parse_search_response(body: &str) -> Result<Vec<SearchResult>, ResolveError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| ResolveError::Transient(format!("malformed API response: {e}")))?;

    Ok(response
        .items
        .into_iter()
        .filter_map(|video| {
            let id = video.id.video_id?;
            let thumbnails = video.snippet.thumbnails;
            let thumbnail_url = thumbnails
                .high
                .or(thumbnails.medium)
                .or(thumbnails.default)
                .map(|t| t.url)
                .unwrap_or_default();

            Some(SearchResult {
                id,
                title: video.snippet.title,
                channel: video.snippet.channel_title,
                thumbnail_url,
                description: video.snippet.description,
            })
        })
        .collect())
}

fn status_error(status: StatusCode, body: &str) -> ResolveError {
    match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
            ResolveError::Unavailable(format!("YouTube API rejected the request ({status})"))
        }
        StatusCode::NOT_FOUND => ResolveError::NotFound(body.to_string()),
        _ => ResolveError::Transient(format!("YouTube API error: {status} - {body}")),
    }
}

#[async_trait]
impl LookupService for YouTubeApiV3Client {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ResolveError> {
        debug!("🔍 YouTube API v3 search: {}", query);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", &limit.to_string()),
                ("key", &self.api_key),
                ("videoEmbeddable", "true"),
                ("order", "relevance"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("❌ YouTube API error: {}", status);
            return Err(status_error(status, &body));
        }

        let results = parse_search_response(&body)?;
        info!("✅ YouTube API v3: {} results", results.len());
        Ok(results)
    }

    async fn resolve_stream(&self, _item_id: &str) -> Result<String, ResolveError> {
        Err(ResolveError::Unavailable(
            "YouTube API v3 does not expose stream URLs".to_string(),
        ))
    }

    async fn download(&self, _item_id: &str, _dest: &Path) -> Result<(), ResolveError> {
        Err(ResolveError::Unavailable(
            "YouTube API v3 does not expose media downloads".to_string(),
        ))
    }

    fn source_name(&self) -> &'static str {
        "YouTube API v3"
    }
}
