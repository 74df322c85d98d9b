//! Cache key derivation.
//!
//! Keys are derived from the request descriptor and the active policy
//! flags. The base key is the request path; policy flags append sorted
//! query pairs, the negotiated encoding, and the caller identity. Keys are
//! bounded at 100 characters: longer keys keep the path prefix for
//! operational inspection and replace the rest with a content hash.

use async_trait::async_trait;
use axum::http::Method;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use super::hasher;
use super::policy::CachePolicy;

/// Maximum assembled key length before the hashed form kicks in.
const MAX_KEY_LENGTH: usize = 100;

/// Everything the caching layer needs to know about one inbound call.
///
/// Built by the axum layer from request parts; constructed directly in
/// tests.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Negotiated content type (Accept header).
    pub accept: Option<String>,
    pub accept_encoding: Option<String>,
    /// Previously issued validator presented by the client.
    pub if_none_match: Option<String>,
    /// Stable caller identity, present only when authenticated.
    pub caller: Option<String>,
}

impl RequestDescriptor {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            accept: None,
            accept_encoding: None,
            if_none_match: None,
            caller: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_accept_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.accept_encoding = Some(encoding.into());
        self
    }

    pub fn with_if_none_match(mut self, validator: impl Into<String>) -> Self {
        self.if_none_match = Some(validator.into());
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller.is_some()
    }
}

/// Derives a stable store key for a request under a policy.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn generate(&self, request: &RequestDescriptor, policy: CachePolicy) -> String;
}

/// Standard key assembly: path, optional sorted query pairs, method,
/// optional encoding, optional caller identity.
#[derive(Debug, Default)]
pub struct DefaultKeyGenerator;

impl DefaultKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    fn assemble(request: &RequestDescriptor, policy: CachePolicy) -> String {
        let mut key = request.path.clone();

        if policy.contains(CachePolicy::VARY_BY_QUERY) {
            let mut pairs = request.query.clone();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, value) in pairs {
                key.push_str(&format!("|{name}-{value}"));
            }
        }

        key.push_str(&format!("|{}", request.method));

        if policy.contains(CachePolicy::VARY_BY_ENCODING)
            && let Some(encoding) = &request.accept_encoding
        {
            key.push_str(&format!("|ae-{encoding}"));
        }

        if policy.contains(CachePolicy::BY_USER)
            && let Some(caller) = &request.caller
        {
            key.push_str(&format!("|user-{caller}"));
        }

        key
    }
}

#[async_trait]
impl KeyGenerator for DefaultKeyGenerator {
    async fn generate(&self, request: &RequestDescriptor, policy: CachePolicy) -> String {
        let key = Self::assemble(request, policy);

        if key.len() > MAX_KEY_LENGTH {
            debug!(original_length = key.len(), "hashing long cache key");
            return format!("{}|h-{}", request.path, hasher::hash(key.as_bytes()));
        }

        key
    }
}

/// Async hook producing an extra key fragment from the request.
pub type CustomKeyPart =
    Arc<dyn for<'a> Fn(&'a RequestDescriptor) -> BoxFuture<'a, Option<String>> + Send + Sync>;

/// Key generator wrapping the default assembly with a fixed prefix, an
/// asynchronously computed fragment, and a fixed suffix — applied in the
/// order: prefix, base key, custom fragment, suffix.
#[derive(Default)]
pub struct ComposedKeyGenerator {
    prefix: Option<String>,
    suffix: Option<String>,
    custom_part: Option<CustomKeyPart>,
    inner: DefaultKeyGenerator,
}

impl ComposedKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_custom_part(mut self, part: CustomKeyPart) -> Self {
        self.custom_part = Some(part);
        self
    }
}

#[async_trait]
impl KeyGenerator for ComposedKeyGenerator {
    async fn generate(&self, request: &RequestDescriptor, policy: CachePolicy) -> String {
        let base = self.inner.generate(request, policy).await;

        let mut key = String::new();
        if let Some(prefix) = &self.prefix {
            key.push_str(prefix);
            key.push(':');
        }
        key.push_str(&base);
        if let Some(custom) = &self.custom_part
            && let Some(part) = custom(request).await
        {
            key.push_str(&format!("|custom-{part}"));
        }
        if let Some(suffix) = &self.suffix {
            key.push(':');
            key.push_str(suffix);
        }

        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn identical_inputs_identical_keys() {
        let generator = DefaultKeyGenerator::new();
        let request = RequestDescriptor::get("/api/products/5");

        let first = generator.generate(&request, CachePolicy::NONE).await;
        let second = generator.generate(&request, CachePolicy::NONE).await;
        assert_eq!(first, second);
        assert_eq!(first, "/api/products/5|GET");
    }

    #[tokio::test]
    async fn query_pairs_are_sorted_and_gated_by_policy() {
        let generator = DefaultKeyGenerator::new();
        let request = RequestDescriptor::get("/api/products")
            .with_query(pairs(&[("size", "10"), ("page", "2")]));

        let without = generator.generate(&request, CachePolicy::NONE).await;
        assert_eq!(without, "/api/products|GET");

        let with = generator
            .generate(&request, CachePolicy::VARY_BY_QUERY)
            .await;
        assert_eq!(with, "/api/products|page-2|size-10|GET");
    }

    #[tokio::test]
    async fn encoding_and_caller_segments() {
        let generator = DefaultKeyGenerator::new();
        let request = RequestDescriptor::get("/api/orders")
            .with_accept_encoding("gzip")
            .with_caller("u-42");

        let policy = CachePolicy::VARY_BY_ENCODING | CachePolicy::BY_USER;
        let key = generator.generate(&request, policy).await;
        assert_eq!(key, "/api/orders|GET|ae-gzip|user-u-42");
    }

    #[tokio::test]
    async fn caller_segment_requires_authentication() {
        let generator = DefaultKeyGenerator::new();
        let request = RequestDescriptor::get("/api/orders");

        let key = generator.generate(&request, CachePolicy::BY_USER).await;
        assert_eq!(key, "/api/orders|GET");
    }

    #[tokio::test]
    async fn long_keys_collapse_to_hashed_form() {
        let generator = DefaultKeyGenerator::new();
        let long_filter = "x".repeat(120);
        let request = RequestDescriptor::get("/api/search").with_query(pairs(&[
            ("filter", long_filter.as_str()),
            ("sort", "name"),
        ]));

        let key = generator
            .generate(&request, CachePolicy::VARY_BY_QUERY)
            .await;

        assert!(key.starts_with("/api/search|h-"));
        // Hashed form stays deterministic for identical inputs.
        let again = generator
            .generate(&request, CachePolicy::VARY_BY_QUERY)
            .await;
        assert_eq!(key, again);
    }

    #[tokio::test]
    async fn composed_generator_applies_prefix_custom_suffix_in_order() {
        let generator = ComposedKeyGenerator::new()
            .with_prefix("tenant-a")
            .with_suffix("v2")
            .with_custom_part(Arc::new(|request: &RequestDescriptor| {
                let accept = request.accept.clone();
                Box::pin(async move { accept })
            }));

        let request = RequestDescriptor::get("/api/products").with_accept("application/json");
        let key = generator.generate(&request, CachePolicy::NONE).await;
        assert_eq!(
            key,
            "tenant-a:/api/products|GET|custom-application/json:v2"
        );
    }

    #[tokio::test]
    async fn composed_generator_skips_empty_parts() {
        let generator = ComposedKeyGenerator::new();
        let request = RequestDescriptor::get("/api/products");
        let key = generator.generate(&request, CachePolicy::NONE).await;
        assert_eq!(key, "/api/products|GET");
    }
}
