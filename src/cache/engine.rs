//! The cache decision engine.
//!
//! One engine instance intercepts one route family: it is constructed with
//! its TTL, policy, strategy, and store known statically, and decides per
//! call whether to serve stored content, invoke the handler, and how to
//! update or invalidate storage afterward.
//!
//! Caching is strictly best-effort: every caching-path failure is tracked
//! against the circuit breaker and downgraded to plain handler execution.
//! The cache must never turn a call that would have succeeded into a
//! failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::breaker::CircuitBreaker;
use super::config::CachingOptions;
use super::context::CallContext;
use super::entry::CacheEntry;
use super::error::CacheError;
use super::hasher;
use super::keys::{DefaultKeyGenerator, KeyGenerator, RequestDescriptor};
use super::metrics::{CacheMetrics, METRIC_FALLBACK_HIT_TOTAL, METRIC_INVALIDATION_TOTAL};
use super::policy::CachePolicy;
use super::store::{CacheStore, MemoryStore};
use super::strategy::{CacheStrategy, DefaultCacheStrategy};
use super::timeout::TimeoutProvider;

/// Buffered handler output: status, serialized body, and any tags the
/// handler wants attached to the stored entry.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub tags: HashMap<String, String>,
}

impl HandlerResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            tags: HashMap::new(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// What the engine decided for one call.
#[derive(Debug)]
pub enum CacheOutcome {
    /// The handler's own output. `validator` is present when the result
    /// went through the caching path.
    Fresh {
        response: HandlerResponse,
        validator: Option<String>,
    },
    /// Stored content served in place of the handler output.
    Cached { content: Bytes, validator: String },
    /// The client's validator still matches; no body.
    NotModified { validator: String },
}

/// Response-caching interceptor. See the module docs for the state machine.
pub struct CacheEngine {
    options: CachingOptions,
    ttl: Duration,
    policy: CachePolicy,
    strategy: Arc<dyn CacheStrategy>,
    key_generator: Arc<dyn KeyGenerator>,
    timeout_provider: Arc<dyn TimeoutProvider>,
    store: Arc<dyn CacheStore>,
    fallback: Arc<MemoryStore>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<CacheMetrics>,
}

impl CacheEngine {
    pub fn builder(store: Arc<dyn CacheStore>) -> CacheEngineBuilder {
        CacheEngineBuilder::new(store)
    }

    pub fn enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// The breaker guarding the remote store, exposed for operational
    /// control (manual open/reset).
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Cache-Control header value for responses served by this engine.
    pub fn cache_control(&self) -> String {
        let scope = if self.policy.contains(CachePolicy::BY_USER) {
            "private"
        } else {
            "public"
        };
        format!("{scope}, max-age={}", self.ttl.as_secs())
    }

    /// Cheap pre-check: does this call take the caching path at all?
    ///
    /// Lets the HTTP layer skip body buffering for calls the engine would
    /// pass straight through.
    pub async fn applies_to(&self, request: &RequestDescriptor) -> bool {
        if !self.options.enabled {
            return false;
        }
        if request.is_get() {
            // An open breaker routes GETs to the fallback path regardless
            // of what the strategy would say.
            self.breaker.is_open() || self.strategy.should_cache(request).await
        } else {
            self.policy.contains(CachePolicy::INVALIDATE_ON_UPDATE)
        }
    }

    /// Run one call through the decision engine.
    pub async fn handle<F, Fut>(&self, request: RequestDescriptor, handler: F) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        if !self.options.enabled {
            debug!("caching disabled; executing handler directly");
            return CacheOutcome::Fresh {
                response: handler().await,
                validator: None,
            };
        }

        if self.breaker.is_open() {
            warn!(path = %request.path, "cache circuit open; using in-process fallback");
            return self.handle_with_open_circuit(&request, handler).await;
        }

        if request.is_get() {
            if !self.strategy.should_cache(&request).await {
                debug!(path = %request.path, "call not cacheable per strategy");
                return CacheOutcome::Fresh {
                    response: handler().await,
                    validator: None,
                };
            }

            let mut ctx = CallContext::new(request.path.clone());
            let key = self.key_generator.generate(&request, self.policy).await;
            debug!(key = %key, "generated cache key");
            ctx.key = Some(key.clone());

            return self.handle_get(&request, ctx, key, handler).await;
        }

        if self.policy.contains(CachePolicy::INVALIDATE_ON_UPDATE) {
            return self.handle_mutation(&request, handler).await;
        }

        CacheOutcome::Fresh {
            response: handler().await,
            validator: None,
        }
    }

    /// Cacheable GET: overlap the store lookup with handler execution,
    /// then reconcile the two results.
    async fn handle_get<F, Fut>(
        &self,
        request: &RequestDescriptor,
        mut ctx: CallContext,
        key: String,
        handler: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        let _latency = self.metrics.measure_latency();

        let (lookup, response) = tokio::join!(self.store.get(&key), handler());
        ctx.tags.extend(response.tags.clone());

        let stored = match lookup {
            Ok(stored) => stored,
            Err(err @ CacheError::Serialization(_)) => {
                // Undecodable entry: a miss, so the bad entry gets overwritten.
                warn!(key = %key, error = %err, "stored entry could not be decoded; treating as miss");
                None
            }
            Err(err) => {
                self.breaker.track(&err);
                warn!(key = %key, error = %err, "store lookup failed; serving handler result uncached");
                return CacheOutcome::Fresh {
                    response,
                    validator: None,
                };
            }
        };

        match stored {
            None => {
                self.metrics.record_miss();
                self.timeout_provider.record_miss(&key);
                debug!(key = %key, outcome = "miss", "cache miss");

                if !response.is_success() {
                    return CacheOutcome::Fresh {
                        response,
                        validator: None,
                    };
                }

                let validator = self.update_store(&key, &response, &ctx).await;
                CacheOutcome::Fresh {
                    response,
                    validator,
                }
            }
            Some(entry) => {
                self.metrics.record_hit();
                debug!(key = %key, outcome = "hit", "cache hit");
                self.serve_hit(request, ctx, key, entry, response).await
            }
        }
    }

    /// Reconcile a stored entry with the freshly produced response.
    async fn serve_hit(
        &self,
        request: &RequestDescriptor,
        ctx: CallContext,
        key: String,
        entry: CacheEntry,
        response: HandlerResponse,
    ) -> CacheOutcome {
        let fresh_hash = hasher::hash(&response.body);
        let validator = entry.validator.clone();
        let hashes_equal = fresh_hash == validator;

        // Conditional request: the client already holds current content.
        if let Some(client_validator) = &request.if_none_match
            && !validator.is_empty()
            && client_validator.contains(&validator)
        {
            debug!(key = %key, "client validator matches; not modified");
            return CacheOutcome::NotModified { validator };
        }

        if hashes_equal {
            if self.policy.contains(CachePolicy::STALE_WHILE_REVALIDATE) {
                debug!(key = %key, "serving stored content; refreshing in background");
                let content = entry.content();
                self.spawn_background_refresh(key, response, ctx);
                return CacheOutcome::Cached { content, validator };
            }

            debug!(key = %key, "serving stored content");
            return CacheOutcome::Cached {
                content: entry.content(),
                validator,
            };
        }

        debug!(key = %key, "content hash mismatch; updating store");
        let validator = self.update_store(&key, &response, &ctx).await;
        CacheOutcome::Fresh {
            response,
            validator,
        }
    }

    /// GET path while the circuit is open: serve from the in-process
    /// fallback when possible, otherwise run the handler and best-effort
    /// store the result locally. Fallback failures never abort the call.
    async fn handle_with_open_circuit<F, Fut>(
        &self,
        request: &RequestDescriptor,
        handler: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        if !request.is_get() {
            return CacheOutcome::Fresh {
                response: handler().await,
                validator: None,
            };
        }

        let key = self.key_generator.generate(request, self.policy).await;

        match self.fallback.get(&key).await {
            Ok(Some(entry)) => {
                counter!(METRIC_FALLBACK_HIT_TOTAL).increment(1);
                debug!(key = %key, "serving from in-process fallback");
                return CacheOutcome::Cached {
                    content: entry.content(),
                    validator: entry.validator,
                };
            }
            Ok(None) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "fallback lookup failed; executing handler");
            }
        }

        let response = handler().await;
        if response.is_success() {
            let entry = CacheEntry::new(&response.body);
            if let Err(err) = self.fallback.set(&key, &entry, self.ttl).await {
                warn!(key = %key, error = %err, "failed to populate fallback store");
            }
        }

        CacheOutcome::Fresh {
            response,
            validator: None,
        }
    }

    /// Mutating call under invalidate-on-update: handler first, related
    /// invalidation only after it reports success. Invalidation failures
    /// are logged and swallowed.
    async fn handle_mutation<F, Fut>(
        &self,
        request: &RequestDescriptor,
        handler: F,
    ) -> CacheOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HandlerResponse>,
    {
        let response = handler().await;

        if response.is_success() {
            counter!(METRIC_INVALIDATION_TOTAL).increment(1);
            if let Err(err) = self
                .strategy
                .invalidate_related(request, self.store.as_ref())
                .await
            {
                self.breaker.track(&err);
                warn!(path = %request.path, error = %err, "failed to invalidate related cache entries");
            }
        }

        CacheOutcome::Fresh {
            response,
            validator: None,
        }
    }

    /// Write the fresh response into the store.
    ///
    /// Returns the fresh validator; store failures are tracked by the
    /// breaker and logged but never surface to the caller (the validator
    /// still fingerprints the body being returned).
    async fn update_store(
        &self,
        key: &str,
        response: &HandlerResponse,
        ctx: &CallContext,
    ) -> Option<String> {
        if response.body.len() as u64 > self.options.size_limit_bytes {
            debug!(
                key = %key,
                body_bytes = response.body.len(),
                "payload exceeds size limit; not stored"
            );
            return Some(hasher::hash(&response.body));
        }

        let entry = self.build_entry(response, ctx);
        let validator = entry.validator.clone();
        let ttl = self.timeout_provider.timeout_for(key, self.ttl);

        let write = self
            .breaker
            .execute_async(|| async { self.store.set(key, &entry, ttl).await })
            .await;
        if let Err(err) = write {
            warn!(key = %key, error = %err, "failed to update cache entry");
        }

        Some(validator)
    }

    fn build_entry(&self, response: &HandlerResponse, ctx: &CallContext) -> CacheEntry {
        let mut entry = CacheEntry::new(&response.body).with_tags(ctx.tags.clone());
        if self.policy.contains(CachePolicy::COMPRESS_CONTENT) {
            entry.compress_if_above(self.options.compression_threshold_bytes);
        }
        entry
    }

    /// Detached stale-while-revalidate refresh. Not tied to the calling
    /// request's lifetime; failures are logged and swallowed.
    fn spawn_background_refresh(
        &self,
        key: String,
        response: HandlerResponse,
        ctx: CallContext,
    ) -> Option<JoinHandle<()>> {
        if !self.options.enable_background_refresh {
            debug!(key = %key, "background refresh disabled; skipping");
            return None;
        }

        let entry = self.build_entry(&response, &ctx);
        let ttl = self.timeout_provider.timeout_for(&key, self.ttl);
        let store = Arc::clone(&self.store);
        let breaker = Arc::clone(&self.breaker);

        Some(tokio::spawn(async move {
            let write = breaker
                .execute_async(|| async { store.set(&key, &entry, ttl).await })
                .await;
            if let Err(err) = write {
                warn!(key = %key, error = %err, "background cache refresh failed");
            }
        }))
    }
}

/// Builds a [`CacheEngine`] with everything known statically: TTL, policy,
/// strategy, and collaborators are explicit constructor inputs rather than
/// anything discovered at runtime.
pub struct CacheEngineBuilder {
    options: CachingOptions,
    ttl: Option<Duration>,
    policy: CachePolicy,
    strategy: Arc<dyn CacheStrategy>,
    key_generator: Arc<dyn KeyGenerator>,
    timeout_provider: Option<Arc<dyn TimeoutProvider>>,
    store: Arc<dyn CacheStore>,
    metrics: Option<Arc<CacheMetrics>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl CacheEngineBuilder {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            options: CachingOptions::default(),
            ttl: None,
            policy: CachePolicy::NONE,
            strategy: Arc::new(DefaultCacheStrategy::new()),
            key_generator: Arc::new(DefaultKeyGenerator::new()),
            timeout_provider: None,
            store,
            metrics: None,
            breaker: None,
        }
    }

    pub fn options(mut self, options: CachingOptions) -> Self {
        self.options = options;
        self
    }

    /// Per-engine TTL; defaults to the configured default TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn CacheStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Override the provider selected by the configured timeout policy.
    pub fn timeout_provider(mut self, provider: Arc<dyn TimeoutProvider>) -> Self {
        self.timeout_provider = Some(provider);
        self
    }

    /// Share a metrics instance across engines.
    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a breaker across engines guarding the same store.
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn build(self) -> Result<CacheEngine, CacheError> {
        self.options.validate()?;

        let timeout_provider = match self.timeout_provider {
            Some(provider) => provider,
            None => self.options.timeout_policy.provider()?,
        };
        let breaker = self.breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::new(
                self.options.breaker_failure_threshold,
                self.options.break_duration(),
            ))
        });

        Ok(CacheEngine {
            ttl: self.ttl.unwrap_or_else(|| self.options.default_ttl()),
            fallback: Arc::new(MemoryStore::new(self.options.fallback_capacity)),
            options: self.options,
            policy: self.policy,
            strategy: self.strategy,
            key_generator: self.key_generator,
            timeout_provider,
            store: self.store,
            metrics: self.metrics.unwrap_or_default(),
            breaker,
        })
    }
}
