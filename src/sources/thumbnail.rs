use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{Lookup, ThumbnailCache};
use crate::error::ResolveError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const PREFETCH_CONCURRENCY: usize = 3;

/// Descarga miniaturas pasando por la caché de disco.
#[derive(Clone)]
pub struct ThumbnailFetcher {
    client: reqwest::Client,
    cache: Arc<ThumbnailCache>,
}

impl ThumbnailFetcher {
    pub fn new(cache: Arc<ThumbnailCache>) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ResolveError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self { client, cache })
    }

    pub async fn fetch(&self, url: &str) -> Result<Bytes, ResolveError> {
        if url.is_empty() {
            return Err(ResolveError::NotFound("empty thumbnail url".to_string()));
        }

        if let Lookup::Hit(data) = self.cache.get(url) {
            debug!("thumbnail cache hit: {}", url);
            return Ok(data);
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::Transient(format!(
                "thumbnail fetch failed: {}",
                response.status()
            )));
        }
        let data = response.bytes().await?;

        if let Err(e) = self.cache.set(url, &data) {
            warn!("⚠️ Could not cache thumbnail {}: {}", url, e);
        }
        Ok(data)
    }

    /// Warms the cache for `urls`, a few at a time. Failures are only logged.
    pub async fn prefetch(&self, urls: Vec<String>) {
        stream::iter(urls)
            .for_each_concurrent(PREFETCH_CONCURRENCY, |url| async move {
                if let Err(e) = self.fetch(&url).await {
                    debug!("thumbnail prefetch failed for {}: {}", url, e);
                }
            })
            .await;
    }
}
