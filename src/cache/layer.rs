//! Response-cache middleware.
//!
//! The axum boundary around the decision engine: builds a request
//! descriptor from the inbound parts, hands the engine a handler closure
//! that buffers the downstream response, and translates the engine's
//! outcome back into an HTTP response with validator (ETag) and
//! Cache-Control headers, or a 304.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, Response as HttpResponse, StatusCode, header, response::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tracing::{instrument, warn};

use super::context::CacheTags;
use super::engine::{CacheEngine, CacheOutcome, HandlerResponse};
use super::keys::RequestDescriptor;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::layer";

/// Stable identity of the authenticated caller.
///
/// Authentication middleware inserts this into request extensions; the
/// descriptor picks it up for user-scoped keys and strategies.
#[derive(Debug, Clone)]
pub struct CallerIdentity(pub String);

/// Shared state for the response cache middleware.
#[derive(Clone)]
pub struct CacheState {
    pub engine: Arc<CacheEngine>,
}

impl CacheState {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self { engine }
    }
}

/// Middleware wrapping one route family with the cache decision engine.
///
/// Calls the engine will not touch (disabled, strategy-ineligible, plain
/// mutations) pass through without body buffering.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let descriptor = describe_request(&request);

    if !cache.engine.applies_to(&descriptor).await {
        return next.run(request).await;
    }

    // The engine only sees status/body/tags; the full response parts are
    // parked here so pass-through responses keep their original headers.
    let captured: Arc<Mutex<Option<(Parts, Bytes)>>> = Arc::new(Mutex::new(None));
    let captured_by_handler = Arc::clone(&captured);

    let outcome = cache
        .engine
        .handle(descriptor, move || async move {
            let response = next.run(request).await;
            buffer_response(response, &captured_by_handler).await
        })
        .await;

    let cache_control = cache.engine.cache_control();
    match outcome {
        CacheOutcome::Fresh {
            response,
            validator,
        } => {
            let mut http_response = match mutex_lock(&captured, SOURCE, "fresh").take() {
                Some((parts, bytes)) => HttpResponse::from_parts(parts, Body::from(bytes)),
                None => (response.status, response.body).into_response(),
            };
            if let Some(validator) = validator {
                apply_cache_headers(http_response.headers_mut(), &validator, &cache_control);
            }
            http_response
        }
        CacheOutcome::Cached { content, validator } => {
            let mut http_response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(content))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            apply_cache_headers(http_response.headers_mut(), &validator, &cache_control);
            http_response
        }
        CacheOutcome::NotModified { validator } => {
            let mut http_response = StatusCode::NOT_MODIFIED.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("\"{validator}\"")) {
                http_response.headers_mut().insert(header::ETAG, value);
            }
            http_response
        }
    }
}

/// Buffer the downstream response, park its parts, and reduce it to the
/// engine's view. A body that cannot be collected becomes a 500 the engine
/// will not cache.
async fn buffer_response(
    response: Response,
    captured: &Arc<Mutex<Option<(Parts, Bytes)>>>,
) -> HandlerResponse {
    let (parts, body) = response.into_parts();
    let bytes = match BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "failed to buffer response body");
            return HandlerResponse::new(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new());
        }
    };

    let status = parts.status;
    let tags = parts
        .extensions
        .get::<CacheTags>()
        .cloned()
        .unwrap_or_default();
    *mutex_lock(captured, SOURCE, "buffer_response") = Some((parts, bytes.clone()));

    HandlerResponse::new(status, bytes).with_tags(tags.0)
}

fn apply_cache_headers(
    headers: &mut axum::http::HeaderMap,
    validator: &str,
    cache_control: &str,
) {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{validator}\"")) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
}

/// Reduce the inbound request to the engine's call descriptor.
fn describe_request(request: &Request<Body>) -> RequestDescriptor {
    let query = request
        .uri()
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let header_value = |name: header::HeaderName| {
        request
            .headers()
            .get(&name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    RequestDescriptor {
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        query,
        accept: header_value(header::ACCEPT),
        accept_encoding: header_value(header::ACCEPT_ENCODING),
        if_none_match: header_value(header::IF_NONE_MATCH),
        caller: request
            .extensions()
            .get::<CallerIdentity>()
            .map(|identity| identity.0.clone()),
    }
}
