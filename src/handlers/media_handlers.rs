//! HTTP handler for media delivery.
//!
//! One handler serves every path: classify → verify token (protected paths)
//! → edge cache (full GETs) → object store → response. Bodies are streamed
//! from the store; a full GET that misses the cache is copied into it after
//! the client has received the whole body.

use crate::{
    errors::AppError,
    handlers::media_response::{
        BuiltResponse, ResponseContext, X_CACHE, build_object_response, cached_response,
        preflight, storable_headers,
    },
    models::{
        media_path::MediaPath,
        range::{ByteRange, RangeParseError},
    },
    services::{
        cache_service::{CacheTee, CachedResponse},
        media_service::MediaService,
    },
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

/// What the request asks for once method and path are checked.
#[derive(Debug, PartialEq, Eq)]
pub enum Classified {
    Preflight,
    Fetch(MediaPath),
}

/// Gate the method and derive the object path.
pub fn classify(method: &Method, uri: &Uri) -> Result<Classified, AppError> {
    if method == Method::OPTIONS {
        return Ok(Classified::Preflight);
    }
    if method != Method::GET {
        return Err(AppError::method_not_allowed());
    }
    MediaPath::from_uri_path(uri.path())
        .map(Classified::Fetch)
        .ok_or_else(AppError::not_found)
}

/// `GET /{*path}` and `OPTIONS /{*path}`.
pub async fn serve_media(
    State(service): State<MediaService>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let path = match classify(&method, &uri)? {
        Classified::Preflight => return Ok(preflight()),
        Classified::Fetch(path) => path,
    };

    if let Some(viewer) = service.authorize(&path, &headers)? {
        debug!(key = %path.key, user_id = %viewer.user_id, "token verified");
    }

    let raw_range = headers
        .get(header::RANGE)
        .map(|value| value.to_str().map_err(|_| RangeParseError::NotText))
        .transpose()?;
    let range = raw_range.map(ByteRange::parse).transpose()?;

    // Ranged requests bypass the cache in both directions.
    let cache_key = match range {
        Some(_) => None,
        None => Some(service.cache_key(&uri)),
    };
    if let Some(key) = cache_key.as_ref() {
        if let Some(cached) = service.cached(key).await {
            debug!(key = %key, "cache hit");
            return Ok(cached_response(cached, &headers, &service.cors));
        }
        debug!(key = %key, "cache miss");
    }

    let object = service
        .fetch(&path.key, raw_range.zip(range))
        .await?
        .ok_or_else(AppError::not_found)?;
    let size = object.size;

    let ctx = ResponseContext {
        path: &path,
        range,
        request_headers: &headers,
        cors: &service.cors,
    };
    let (status, mut response_headers, body) = match build_object_response(object, &ctx) {
        BuiltResponse::NotModified(response) => return Ok(response),
        BuiltResponse::Object {
            status,
            headers,
            body,
        } => (status, headers, body),
    };

    let body = match cache_key {
        Some(key) if status == StatusCode::OK && size <= service.cache_max_object_bytes => {
            let snapshot = CachedResponse {
                status,
                headers: storable_headers(&response_headers),
                body: Bytes::new(),
            };
            let on_complete = service.cache_writer(key, snapshot, path.kind.cache_ttl());
            response_headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
            CacheTee::new(body, size as usize, on_complete).boxed()
        }
        Some(_) => {
            response_headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
            body
        }
        None => body,
    };

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
