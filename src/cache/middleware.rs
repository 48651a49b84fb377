//! Page cache middleware.
//!
//! Serves stored pages before the handler runs and captures eligible
//! responses after it. Filesystem work runs on the blocking pool.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{instrument, warn};

use super::classifier::{MissReason, RequestFacts, RuntimeFlags, record_miss};
use super::config::CacheConfig;
use super::engine::{CacheEngine, CaptureOutcome, Lookup};

/// Names the engine on responses served from disk.
pub const SERVED_BY_HEADER: HeaderName = HeaderName::from_static("x-quire-served-by");
/// Names the rule that kept a response out of the cache.
pub const MISS_HEADER: HeaderName = HeaderName::from_static("x-quire-cache-miss");

/// Largest body the layer buffers for capture.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// Shared state for [`page_cache_layer`].
#[derive(Clone)]
pub struct PageCacheState {
    pub config: CacheConfig,
    pub engine: Arc<CacheEngine>,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(cache): State<PageCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let facts = RequestFacts::from_request(&request, cache.config.default_https);
    let mut flags = request
        .extensions()
        .get::<RuntimeFlags>()
        .cloned()
        .unwrap_or_default();

    let lookup = {
        let engine = Arc::clone(&cache.engine);
        let facts = facts.clone();
        let flags = flags.clone();
        tokio::task::spawn_blocking(move || engine.lookup(&facts, &flags)).await
    };

    match lookup {
        Ok(Lookup::Hit(body)) => return hit_response(cache.engine.store().engine_name(), body),
        Ok(Lookup::Bypass(reason)) => {
            let mut response = next.run(request).await;
            set_miss_header(&mut response, reason);
            return response;
        }
        Ok(Lookup::Miss) => {}
        Err(err) => {
            warn!(
                target = "quire::cache::middleware",
                op = "lookup",
                result = "error",
                error = %err,
                "Cache lookup task failed, rendering live"
            );
            return next.run(request).await;
        }
    }

    let response = next.run(request).await;

    if let Some(late) = response.extensions().get::<RuntimeFlags>() {
        flags.merge(late);
    }
    if response.status() == StatusCode::NOT_FOUND {
        flags.not_found = true;
    }

    if let Some(reason) = precheck_response(&response) {
        record_miss(reason, &facts.path);
        let mut response = response;
        set_miss_header(&mut response, reason);
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CAPTURE_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                target = "quire::cache::middleware",
                op = "capture",
                result = "error",
                error = %err,
                "Failed to collect response body"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let outcome = {
        let engine = Arc::clone(&cache.engine);
        let body = bytes.clone();
        tokio::task::spawn_blocking(move || engine.capture(&facts, &flags, &body)).await
    };

    let mut response = Response::from_parts(parts, Body::from(bytes));
    match outcome {
        Ok(CaptureOutcome::Rejected(reason)) => set_miss_header(&mut response, reason),
        Ok(CaptureOutcome::Stored(_) | CaptureOutcome::Failed(_)) => {}
        Err(err) => warn!(
            target = "quire::cache::middleware",
            op = "capture",
            result = "error",
            error = %err,
            "Cache capture task failed"
        ),
    }
    response
}

/// Rejections decided before the body is buffered.
///
/// A 404 is left to the classifier so it reports the not-found rule.
fn precheck_response(response: &Response) -> Option<MissReason> {
    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
        return Some(MissReason::StatusNotOk);
    }

    let declared = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_CAPTURE_BYTES) {
        return Some(MissReason::BodyTooLarge);
    }

    // Without an upper bound the body cannot be buffered safely.
    match response.body().size_hint().upper() {
        None => Some(MissReason::UnsizedBody),
        Some(upper) if upper > MAX_CAPTURE_BYTES as u64 => Some(MissReason::BodyTooLarge),
        Some(_) => None,
    }
}

fn hit_response(engine_name: &str, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(engine_name) {
        headers.insert(SERVED_BY_HEADER, value);
    }
    response
}

fn set_miss_header(response: &mut Response, reason: MissReason) {
    response
        .headers_mut()
        .insert(MISS_HEADER, HeaderValue::from_static(reason.description()));
}
