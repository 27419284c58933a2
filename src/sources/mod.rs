pub mod mock;
pub mod search;
pub mod smart_source;
pub mod thumbnail;
pub mod youtube_api_v3;
pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::ResolveError;

pub use mock::MockSource;
pub use search::SearchService;
pub use smart_source::SmartSource;
pub use thumbnail::ThumbnailFetcher;
pub use youtube_api_v3::YouTubeApiV3Client;
pub use ytdlp::YtDlpClient;

/// Servicio externo de búsqueda y resolución.
///
/// Every call may be slow and may fail; callers treat failures as
/// recoverable misses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LookupService: Send + Sync {
    /// Busca items por texto libre.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ResolveError>;

    /// Obtiene una URL de stream reproducible para un item.
    async fn resolve_stream(&self, item_id: &str) -> Result<String, ResolveError>;

    /// Descarga el audio completo de un item en `dest`.
    async fn download(&self, item_id: &str, dest: &Path) -> Result<(), ResolveError>;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}

/// Un resultado de búsqueda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub thumbnail_url: String,
    #[serde(default)]
    pub description: String,
}

/// Canonical watch page for an item id.
pub fn watch_url(item_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", item_id)
}

/// Whether `item_id` looks like a YouTube video id.
pub fn is_valid_item_id(item_id: &str) -> bool {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    ID_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"))
        .is_match(item_id)
}

/// Extrae el id de video de una URL de YouTube, o lo devuelve tal cual si ya
/// es un id.
pub fn extract_item_id(input: &str) -> Option<String> {
    let input = input.trim();
    if is_valid_item_id(input) {
        return Some(input.to_string());
    }

    let parsed = url::Url::parse(input).ok()?;

    // youtube.com/watch?v=VIDEO_ID
    if let Some((_, value)) = parsed.query_pairs().find(|(key, _)| key == "v") {
        return Some(value.into_owned()).filter(|id| is_valid_item_id(id));
    }

    // youtu.be/VIDEO_ID
    if parsed.host_str() == Some("youtu.be") {
        return parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
            .filter(|id| is_valid_item_id(id));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_extraction() {
        assert_eq!(extract_item_id("dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            extract_item_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_item_id("https://youtu.be/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(extract_item_id("https://example.com/video"), None);
        assert_eq!(extract_item_id("not an id"), None);
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(watch_url("abc"), "https://www.youtube.com/watch?v=abc");
    }
}
