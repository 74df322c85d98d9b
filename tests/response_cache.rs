use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::Path,
    http::{Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::{get, put},
};
use http_body_util::BodyExt;
use scorta::cache::{
    CacheEngine, CachePolicy, CacheState, CacheStore, CallerIdentity, MemoryStore,
    response_cache_layer,
};
use tower::ServiceExt;

fn cached_router(engine: Arc<CacheEngine>, calls: Arc<AtomicUsize>) -> Router {
    let put_calls = Arc::clone(&calls);
    Router::new()
        .route(
            "/api/products/{id}",
            get(move |Path(id): Path<u64>| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::OK, format!("{{\"id\":{id}}}"))
                }
            }),
        )
        .route(
            "/api/products/{id}",
            put(move |Path(id): Path<u64>| {
                let calls = Arc::clone(&put_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::OK, format!("{{\"id\":{id},\"updated\":true}}"))
                }
            }),
        )
        .layer(middleware::from_fn_with_state(
            CacheState::new(engine),
            response_cache_layer,
        ))
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn body_string(response: Response) -> String {
    let bytes = BodyExt::collect(response.into_body())
        .await
        .expect("body collects")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

#[tokio::test]
async fn two_identical_gets_are_miss_then_hit_with_one_validator() {
    let store = Arc::new(MemoryStore::new(64));
    let engine = Arc::new(
        CacheEngine::builder(store as Arc<dyn CacheStore>)
            .ttl(Duration::from_secs(120))
            .policy(CachePolicy::NONE)
            .build()
            .expect("engine builds"),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let app = cached_router(Arc::clone(&engine), Arc::clone(&calls));

    let first = send(&app, get_request("/api/products/5")).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first_etag = first
        .headers()
        .get(header::ETAG)
        .expect("validator on first response")
        .clone();
    assert_eq!(body_string(first).await, "{\"id\":5}");

    let second = send(&app, get_request("/api/products/5")).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_etag = second
        .headers()
        .get(header::ETAG)
        .expect("validator on second response")
        .clone();
    assert_eq!(body_string(second).await, "{\"id\":5}");

    assert_eq!(first_etag, second_etag);
    // Handler ran both times; the second result was discarded for the
    // stored copy.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.metrics().misses(), 1);
    assert_eq!(engine.metrics().hits(), 1);
}

#[tokio::test]
async fn matching_if_none_match_yields_304_without_a_body() {
    let store = Arc::new(MemoryStore::new(64));
    let engine = Arc::new(
        CacheEngine::builder(store as Arc<dyn CacheStore>)
            .ttl(Duration::from_secs(120))
            .build()
            .expect("engine builds"),
    );
    let app = cached_router(engine, Arc::new(AtomicUsize::new(0)));

    let first = send(&app, get_request("/api/products/7")).await;
    let etag = first
        .headers()
        .get(header::ETAG)
        .expect("validator issued")
        .to_str()
        .unwrap()
        .to_string();

    let conditional = Request::builder()
        .method(Method::GET)
        .uri("/api/products/7")
        .header(header::IF_NONE_MATCH, &etag)
        .body(Body::empty())
        .unwrap();
    let response = send(&app, conditional).await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(
        response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok()),
        Some(etag.as_str())
    );
    assert!(body_string(response).await.is_empty());
}

#[tokio::test]
async fn successful_update_invalidates_only_the_touched_resource() {
    let store = Arc::new(MemoryStore::new(64));
    let engine = Arc::new(
        CacheEngine::builder(Arc::clone(&store) as Arc<dyn CacheStore>)
            .ttl(Duration::from_secs(120))
            .policy(CachePolicy::INVALIDATE_ON_UPDATE)
            .build()
            .expect("engine builds"),
    );
    let app = cached_router(Arc::clone(&engine), Arc::new(AtomicUsize::new(0)));

    // Populate entries for two resources.
    send(&app, get_request("/api/products/5")).await;
    send(&app, get_request("/api/products/6")).await;
    assert_eq!(engine.metrics().misses(), 2);

    let update = Request::builder()
        .method(Method::PUT)
        .uri("/api/products/5")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, update).await.status(), StatusCode::OK);

    // The updated resource misses again; its sibling is still cached.
    send(&app, get_request("/api/products/5")).await;
    assert_eq!(engine.metrics().misses(), 3);
    send(&app, get_request("/api/products/6")).await;
    assert_eq!(engine.metrics().hits(), 1);
}

#[tokio::test]
async fn cache_control_reflects_the_per_user_flag() {
    let store = Arc::new(MemoryStore::new(64));
    let public_engine = Arc::new(
        CacheEngine::builder(Arc::clone(&store) as Arc<dyn CacheStore>)
            .ttl(Duration::from_secs(120))
            .build()
            .expect("engine builds"),
    );
    let app = cached_router(public_engine, Arc::new(AtomicUsize::new(0)));

    let response = send(&app, get_request("/api/products/5")).await;
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok()),
        Some("public, max-age=120")
    );

    let private_store = Arc::new(MemoryStore::new(64));
    let private_engine = Arc::new(
        CacheEngine::builder(private_store as Arc<dyn CacheStore>)
            .ttl(Duration::from_secs(120))
            .policy(CachePolicy::AUTHENTICATED_USER)
            .build()
            .expect("engine builds"),
    );
    let app = cached_router(private_engine, Arc::new(AtomicUsize::new(0))).layer(
        middleware::from_fn(|mut request: Request<Body>, next: Next| async move {
            request
                .extensions_mut()
                .insert(CallerIdentity("u-1".to_string()));
            next.run(request).await
        }),
    );

    let response = send(&app, get_request("/api/products/5")).await;
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok()),
        Some("private, max-age=120")
    );
}

#[tokio::test]
async fn open_circuit_serves_fallback_without_invoking_the_handler() {
    let store = Arc::new(MemoryStore::new(64));
    let engine = Arc::new(
        CacheEngine::builder(store as Arc<dyn CacheStore>)
            .ttl(Duration::from_secs(120))
            .build()
            .expect("engine builds"),
    );
    engine.breaker().open();
    let calls = Arc::new(AtomicUsize::new(0));
    let app = cached_router(Arc::clone(&engine), Arc::clone(&calls));

    // First pass populates the in-process fallback.
    let first = send(&app, get_request("/api/products/9")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Second pass is served from the fallback.
    let second = send(&app, get_request("/api/products/9")).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_string(second).await, "{\"id\":9}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
