//! Cacheability policy and targeted invalidation.
//!
//! A strategy decides whether a call's response may be cached and which
//! stored entries a mutating call invalidates. The engine depends only on
//! the [`CacheStrategy`] trait; concrete strategies are passed in at
//! construction.

use async_trait::async_trait;
use tracing::debug;

use super::error::CacheError;
use super::keys::RequestDescriptor;
use super::store::CacheStore;

#[async_trait]
pub trait CacheStrategy: Send + Sync {
    /// Whether the response to this call may be cached at all.
    async fn should_cache(&self, request: &RequestDescriptor) -> bool;

    /// Delete stored entries made stale by a successful mutating call.
    async fn invalidate_related(
        &self,
        request: &RequestDescriptor,
        store: &dyn CacheStore,
    ) -> Result<(), CacheError>;
}

/// Scan-and-delete every key matching `pattern`. Returns the delete count.
async fn sweep(store: &dyn CacheStore, pattern: &str) -> Result<u64, CacheError> {
    let keys = store.keys_matching(pattern).await?;
    if keys.is_empty() {
        return Ok(0);
    }
    let deleted = store.delete(&keys).await?;
    debug!(pattern, deleted, "invalidated cache entries");
    Ok(deleted)
}

/// Cache GET calls only; invalidate everything under the call's path.
#[derive(Debug, Default)]
pub struct DefaultCacheStrategy;

impl DefaultCacheStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheStrategy for DefaultCacheStrategy {
    async fn should_cache(&self, request: &RequestDescriptor) -> bool {
        request.is_get()
    }

    async fn invalidate_related(
        &self,
        request: &RequestDescriptor,
        store: &dyn CacheStore,
    ) -> Result<(), CacheError> {
        sweep(store, &format!("{}*", request.path)).await?;
        Ok(())
    }
}

/// Restrict caching to authenticated callers; invalidation additionally
/// sweeps the caller's user-keyed entries.
#[derive(Debug, Default)]
pub struct UserScopedCacheStrategy;

impl UserScopedCacheStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheStrategy for UserScopedCacheStrategy {
    async fn should_cache(&self, request: &RequestDescriptor) -> bool {
        request.is_get() && request.is_authenticated()
    }

    async fn invalidate_related(
        &self,
        request: &RequestDescriptor,
        store: &dyn CacheStore,
    ) -> Result<(), CacheError> {
        sweep(store, &format!("{}*", request.path)).await?;

        if let Some(caller) = &request.caller {
            sweep(store, &format!("*|user-{caller}*")).await?;
        }
        Ok(())
    }
}

/// Restrict caching by the negotiated content type.
///
/// A missing Accept header counts as cacheable; otherwise one of the
/// configured content types must appear in it.
pub struct ContentTypeCacheStrategy {
    cacheable_content_types: Vec<String>,
}

impl ContentTypeCacheStrategy {
    pub fn new(cacheable_content_types: Vec<String>) -> Self {
        let cacheable_content_types = if cacheable_content_types.is_empty() {
            vec!["application/json".to_string()]
        } else {
            cacheable_content_types
        };
        Self {
            cacheable_content_types,
        }
    }
}

impl Default for ContentTypeCacheStrategy {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl CacheStrategy for ContentTypeCacheStrategy {
    async fn should_cache(&self, request: &RequestDescriptor) -> bool {
        if !request.is_get() {
            return false;
        }
        match &request.accept {
            None => true,
            Some(accept) => self
                .cacheable_content_types
                .iter()
                .any(|content_type| accept.contains(content_type)),
        }
    }

    async fn invalidate_related(
        &self,
        request: &RequestDescriptor,
        store: &dyn CacheStore,
    ) -> Result<(), CacheError> {
        sweep(store, &format!("{}*", request.path)).await?;
        Ok(())
    }
}

/// Cascading invalidation for one resource family.
///
/// Configured with the resource's path prefix and cascade patterns that may
/// reference the updated resource id as `{id}` (e.g. updating a category
/// also invalidates products-by-category and the popular listing). When the
/// call path carries no resource id, everything under the prefix is swept.
pub struct ResourceCacheStrategy {
    resource_prefix: String,
    cascades: Vec<String>,
}

impl ResourceCacheStrategy {
    pub fn new(resource_prefix: impl Into<String>, cascades: Vec<String>) -> Self {
        Self {
            resource_prefix: resource_prefix.into(),
            cascades,
        }
    }

    /// Trailing numeric path segment, when present.
    fn resource_id(request: &RequestDescriptor) -> Option<u64> {
        request
            .path
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse().ok())
    }
}

#[async_trait]
impl CacheStrategy for ResourceCacheStrategy {
    async fn should_cache(&self, request: &RequestDescriptor) -> bool {
        request.is_get()
    }

    async fn invalidate_related(
        &self,
        request: &RequestDescriptor,
        store: &dyn CacheStore,
    ) -> Result<(), CacheError> {
        match Self::resource_id(request) {
            Some(id) => {
                sweep(store, &format!("{}/{id}|*", self.resource_prefix)).await?;
                for cascade in &self.cascades {
                    let pattern = cascade.replace("{id}", &id.to_string());
                    sweep(store, &pattern).await?;
                }
            }
            None => {
                // No identifiable resource: clear the whole family.
                sweep(store, &format!("{}*", self.resource_prefix)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Method;

    use super::*;
    use crate::cache::entry::CacheEntry;
    use crate::cache::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(60);

    async fn seeded_store(keys: &[&str]) -> MemoryStore {
        let store = MemoryStore::new(64);
        let entry = CacheEntry::new(b"{}");
        for key in keys {
            store.set(key, &entry, TTL).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn default_strategy_caches_get_only() {
        let strategy = DefaultCacheStrategy::new();
        assert!(strategy.should_cache(&RequestDescriptor::get("/api/products")).await);
        assert!(
            !strategy
                .should_cache(&RequestDescriptor::new(Method::POST, "/api/products"))
                .await
        );
    }

    #[tokio::test]
    async fn default_strategy_sweeps_path_prefix() {
        let store = seeded_store(&[
            "/api/products|GET",
            "/api/products/5|GET",
            "/api/categories|GET",
        ])
        .await;
        let strategy = DefaultCacheStrategy::new();

        strategy
            .invalidate_related(&RequestDescriptor::new(Method::PUT, "/api/products"), &store)
            .await
            .unwrap();

        assert!(store.get("/api/products|GET").await.unwrap().is_none());
        assert!(store.get("/api/products/5|GET").await.unwrap().is_none());
        assert!(store.get("/api/categories|GET").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn user_scoped_strategy_requires_authentication() {
        let strategy = UserScopedCacheStrategy::new();
        assert!(
            !strategy
                .should_cache(&RequestDescriptor::get("/api/orders"))
                .await
        );
        assert!(
            strategy
                .should_cache(&RequestDescriptor::get("/api/orders").with_caller("u-1"))
                .await
        );
    }

    #[tokio::test]
    async fn user_scoped_strategy_sweeps_user_entries() {
        let store = seeded_store(&[
            "/api/orders|GET|user-u-1",
            "/api/profile|GET|user-u-1",
            "/api/profile|GET|user-u-2",
        ])
        .await;
        let strategy = UserScopedCacheStrategy::new();

        let request = RequestDescriptor::new(Method::PUT, "/api/orders").with_caller("u-1");
        strategy.invalidate_related(&request, &store).await.unwrap();

        assert!(store.get("/api/orders|GET|user-u-1").await.unwrap().is_none());
        assert!(store.get("/api/profile|GET|user-u-1").await.unwrap().is_none());
        assert!(store.get("/api/profile|GET|user-u-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn content_type_strategy_checks_accept_header() {
        let strategy = ContentTypeCacheStrategy::default();

        assert!(strategy.should_cache(&RequestDescriptor::get("/api/products")).await);
        assert!(
            strategy
                .should_cache(
                    &RequestDescriptor::get("/api/products").with_accept("application/json")
                )
                .await
        );
        assert!(
            !strategy
                .should_cache(&RequestDescriptor::get("/api/products").with_accept("text/html"))
                .await
        );
    }

    #[tokio::test]
    async fn resource_strategy_cascades_from_id() {
        let store = seeded_store(&[
            "/api/categories/5|GET",
            "/api/products/category/5|GET",
            "/api/categories/popular|GET",
            "/api/categories/6|GET",
        ])
        .await;
        let strategy = ResourceCacheStrategy::new(
            "/api/categories",
            vec![
                "/api/products/category/{id}|*".to_string(),
                "/api/categories/popular|*".to_string(),
            ],
        );

        let request = RequestDescriptor::new(Method::PUT, "/api/categories/5");
        strategy.invalidate_related(&request, &store).await.unwrap();

        assert!(store.get("/api/categories/5|GET").await.unwrap().is_none());
        assert!(store.get("/api/products/category/5|GET").await.unwrap().is_none());
        assert!(store.get("/api/categories/popular|GET").await.unwrap().is_none());
        // A sibling resource survives the cascade.
        assert!(store.get("/api/categories/6|GET").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resource_strategy_without_id_sweeps_family() {
        let store = seeded_store(&[
            "/api/categories/5|GET",
            "/api/categories|GET",
            "/api/products|GET",
        ])
        .await;
        let strategy = ResourceCacheStrategy::new("/api/categories", Vec::new());

        let request = RequestDescriptor::new(Method::POST, "/api/categories");
        strategy.invalidate_related(&request, &store).await.unwrap();

        assert!(store.get("/api/categories/5|GET").await.unwrap().is_none());
        assert!(store.get("/api/categories|GET").await.unwrap().is_none());
        assert!(store.get("/api/products|GET").await.unwrap().is_some());
    }
}
