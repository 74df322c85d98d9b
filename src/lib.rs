//! Scorta: a response-caching interceptor layer for axum services.
//!
//! Transparently caches expensive request/response cycles while staying
//! correct under partial backend failure: content-hash validators for
//! change detection, stale-while-revalidate, adaptive timeouts, and
//! circuit-breaker-protected Redis storage with an in-process fallback.

pub mod cache;
pub mod infra;
