use std::sync::Arc;
use tracing::{debug, info};

use super::{LookupService, SearchResult};
use crate::cache::{Lookup, SearchCache};
use crate::error::ResolveError;

/// Búsqueda con caché delante del servicio externo.
#[derive(Clone)]
pub struct SearchService {
    lookup: Arc<dyn LookupService>,
    cache: Arc<SearchCache>,
    limit: usize,
}

impl SearchService {
    pub fn new(lookup: Arc<dyn LookupService>, cache: Arc<SearchCache>, limit: usize) -> Self {
        Self {
            lookup,
            cache,
            limit,
        }
    }

    /// Serves `query` from the search cache when possible. Empty result
    /// lists are returned but never cached.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ResolveError> {
        if let Lookup::Hit(results) = self.cache.get(query) {
            debug!("search cache hit: {}", query);
            return Ok(results);
        }

        let results = self.lookup.search(query, self.limit).await?;
        info!(
            "🔍 {} results for '{}' via {}",
            results.len(),
            query,
            self.lookup.source_name()
        );

        if !results.is_empty() {
            self.cache.set(query, &results);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, KeyPolicy, ManualClock};
    use crate::sources::MockLookupService;
    use std::time::Duration;

    fn result(id: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: "t".to_string(),
            channel: "c".to_string(),
            thumbnail_url: String::new(),
            description: String::new(),
        }
    }

    fn cache(dir: &std::path::Path) -> Arc<SearchCache> {
        let config = CacheConfig::new()
            .with_ttl(Duration::from_secs(3600))
            .with_max_entries(10)
            .with_keys(KeyPolicy::FreeText);
        Arc::new(SearchCache::open(dir, config, Arc::new(ManualClock::at_epoch())))
    }

    #[tokio::test]
    async fn test_second_search_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut lookup = MockLookupService::new();
        lookup
            .expect_search()
            .withf(|query, limit| query == "lofi beats" && *limit == 5)
            .times(1)
            .returning(|_, _| Ok(vec![result("aaaaaaaaaaa")]));
        lookup.expect_source_name().return_const("mock");

        let service = SearchService::new(Arc::new(lookup), cache(dir.path()), 5);
        assert_eq!(service.search("lofi beats").await.unwrap().len(), 1);
        // normalized key
        assert_eq!(service.search("  LOFI beats ").await.unwrap()[0].id, "aaaaaaaaaaa");
    }

    #[tokio::test]
    async fn test_empty_results_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut lookup = MockLookupService::new();
        lookup.expect_search().times(2).returning(|_, _| Ok(Vec::new()));
        lookup.expect_source_name().return_const("mock");

        let service = SearchService::new(Arc::new(lookup), cache(dir.path()), 5);
        assert!(service.search("nothing").await.unwrap().is_empty());
        assert!(service.search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut lookup = MockLookupService::new();
        lookup
            .expect_search()
            .returning(|_, _| Err(ResolveError::Timeout(Duration::from_secs(15))));

        let service = SearchService::new(Arc::new(lookup), cache(dir.path()), 5);
        assert!(matches!(
            service.search("q").await,
            Err(ResolveError::Timeout(_))
        ));
    }
}
