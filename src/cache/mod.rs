//! Scorta caching layer.
//!
//! A response-caching interceptor for axum services. Per call, the
//! decision engine derives a store key, consults the strategy and the
//! circuit breaker, overlaps the store lookup with handler execution, and
//! decides between serving stored content, a not-modified signal, or the
//! fresh handler result — updating or invalidating storage afterward.
//!
//! ## Configuration
//!
//! The engine is built explicitly with its TTL, policy, and strategy:
//!
//! ```ignore
//! let store = Arc::new(RedisStore::connect("redis://localhost").await?);
//! let engine = CacheEngine::builder(store)
//!     .ttl(Duration::from_secs(120))
//!     .policy(CachePolicy::API)
//!     .build()?;
//! let app = Router::new()
//!     .route("/api/products/{id}", get(product))
//!     .layer(middleware::from_fn_with_state(
//!         CacheState::new(Arc::new(engine)),
//!         response_cache_layer,
//!     ));
//! ```

mod breaker;
mod config;
mod context;
mod engine;
mod entry;
mod error;
mod hasher;
mod keys;
mod layer;
mod lock;
mod metrics;
mod policy;
mod store;
mod strategy;
mod timeout;

pub use breaker::CircuitBreaker;
pub use config::{CachingOptions, TimeoutPolicy};
pub use context::{CacheTags, CallContext};
pub use engine::{CacheEngine, CacheEngineBuilder, CacheOutcome, HandlerResponse};
pub use entry::CacheEntry;
pub use error::CacheError;
pub use hasher::hash;
pub use keys::{ComposedKeyGenerator, CustomKeyPart, DefaultKeyGenerator, KeyGenerator, RequestDescriptor};
pub use layer::{CacheState, CallerIdentity, response_cache_layer};
pub use metrics::{CacheMetrics, LatencyMeasurement};
pub use policy::CachePolicy;
pub use store::{CacheStore, MemoryStore, RedisStore};
pub use strategy::{
    CacheStrategy, ContentTypeCacheStrategy, DefaultCacheStrategy, ResourceCacheStrategy,
    UserScopedCacheStrategy,
};
pub use timeout::{
    AdaptiveTimeoutProvider, PathTimeoutProvider, StaticTimeoutProvider, TimeoutProvider,
};
