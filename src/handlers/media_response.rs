//! Response assembly for media objects: conditional GET, caching headers,
//! range status, CORS and the fixed security headers.

use crate::{
    models::{
        media_path::MediaPath,
        object::{ObjectBody, StoredObject},
        range::ByteRange,
    },
    services::cache_service::CachedResponse,
};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const NOT_MODIFIED_CACHE_CONTROL: &str = "public, max-age=60";
const ALLOW_METHODS: &str = "GET, OPTIONS";
const ALLOW_HEADERS: &str = "Authorization, Range";
const PREFLIGHT_ALLOW_HEADERS: &str = "Authorization, Range, Content-Type";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Headers that describe the representation and survive into a 304.
const REVALIDATION_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LANGUAGE,
    header::CONTENT_ENCODING,
    header::ETAG,
];

/// Origins allowed to read responses with credentials.
#[derive(Clone, Debug, Default)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// Echo an allowed `Origin` with credentials; always advertise the
    /// accepted methods and request headers.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&HeaderValue>) {
        if let Some(origin) = origin {
            if origin.to_str().map(|o| self.is_allowed(o)).unwrap_or(false) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                    HeaderValue::from_static("true"),
                );
            }
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
    }
}

/// Per-request inputs to the builder.
pub struct ResponseContext<'a> {
    pub path: &'a MediaPath,
    pub range: Option<ByteRange>,
    pub request_headers: &'a HeaderMap,
    pub cors: &'a CorsPolicy,
}

/// Outcome of building a response for a fetched object.
pub enum BuiltResponse {
    /// Conditional GET matched; no body.
    NotModified(Response),
    /// Head of a 200/206 whose body is still the store stream.
    Object {
        status: StatusCode,
        headers: HeaderMap,
        body: ObjectBody,
    },
}

/// `OPTIONS` answer: permissive, bodiless, no auth.
pub fn preflight() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

pub fn apply_security_headers(headers: &mut HeaderMap) {
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
}

/// True when `If-None-Match` is present and equals `etag` exactly.
pub fn if_none_match_hits(request_headers: &HeaderMap, etag: Option<&HeaderValue>) -> bool {
    match (request_headers.get(header::IF_NONE_MATCH), etag) {
        (Some(candidate), Some(etag)) => candidate.as_bytes() == etag.as_bytes(),
        _ => false,
    }
}

/// 304 carrying the representation headers and a short revalidation lifetime.
pub fn not_modified(mut headers: HeaderMap) -> Response {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(NOT_MODIFIED_CACHE_CONTROL),
    );
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    *response.headers_mut() = headers;
    response
}

/// Compose the response for an object fetched from the store.
pub fn build_object_response(object: StoredObject, ctx: &ResponseContext<'_>) -> BuiltResponse {
    let mut headers = HeaderMap::new();
    object.write_http_metadata(&mut headers);
    let etag = object
        .http_etag
        .as_deref()
        .and_then(|etag| HeaderValue::from_str(etag).ok());
    if let Some(etag) = etag.as_ref() {
        headers.insert(header::ETAG, etag.clone());
    }

    if if_none_match_hits(ctx.request_headers, etag.as_ref()) {
        return BuiltResponse::NotModified(not_modified(headers));
    }

    let cache_control = if ctx.range.is_some() {
        HeaderValue::from_static("no-store")
    } else {
        let ttl = ctx.path.kind.cache_ttl().as_secs();
        header_value(format!("public, max-age={ttl}, s-maxage={ttl}"))
    };
    headers.insert(header::CACHE_CONTROL, cache_control);
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    apply_security_headers(&mut headers);
    ctx.cors
        .apply(&mut headers, ctx.request_headers.get(header::ORIGIN));

    let status = match ctx.range {
        Some(range) => {
            let span = object.range.unwrap_or_else(|| range.span(object.size));
            headers.insert(
                header::CONTENT_RANGE,
                header_value(format!(
                    "bytes {}-{}/{}",
                    span.offset,
                    span.last(),
                    object.size
                )),
            );
            headers.insert(header::CONTENT_LENGTH, header_value(span.length.to_string()));
            StatusCode::PARTIAL_CONTENT
        }
        None => {
            headers.insert(header::CONTENT_LENGTH, header_value(object.size.to_string()));
            StatusCode::OK
        }
    };

    BuiltResponse::Object {
        status,
        headers,
        body: object.body,
    }
}

/// Replay a cached full response for this request.
pub fn cached_response(
    cached: CachedResponse,
    request_headers: &HeaderMap,
    cors: &CorsPolicy,
) -> Response {
    if if_none_match_hits(request_headers, cached.headers.get(header::ETAG)) {
        let mut headers = HeaderMap::new();
        for name in REVALIDATION_HEADERS {
            if let Some(value) = cached.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }
        return not_modified(headers);
    }

    let mut headers = cached.headers;
    apply_security_headers(&mut headers);
    cors.apply(&mut headers, request_headers.get(header::ORIGIN));
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));

    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = cached.status;
    *response.headers_mut() = headers;
    response
}

/// Headers worth keeping in a shared cache entry: everything except the
/// per-caller CORS echo and the cache marker.
pub fn storable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut stored = headers.clone();
    stored.remove(header::ACCESS_CONTROL_ALLOW_ORIGIN);
    stored.remove(header::ACCESS_CONTROL_ALLOW_CREDENTIALS);
    stored.remove(X_CACHE);
    stored
}

fn header_value(value: String) -> HeaderValue {
    // Only ever called with ASCII digits, spaces and punctuation.
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::{ByteSpan, HttpMetadata};
    use bytes::Bytes;
    use futures::StreamExt;

    fn object(size: u64, range: Option<ByteSpan>) -> StoredObject {
        StoredObject {
            key: "videos/xyz.mp4".into(),
            size,
            http_etag: Some("\"abc123\"".into()),
            http_metadata: HttpMetadata {
                content_type: Some("video/mp4".into()),
                ..Default::default()
            },
            range,
            body: futures::stream::empty().boxed(),
        }
    }

    fn cors() -> CorsPolicy {
        CorsPolicy::new(vec!["http://localhost:5173".into()])
    }

    fn expect_object(built: BuiltResponse) -> (StatusCode, HeaderMap) {
        match built {
            BuiltResponse::Object { status, headers, .. } => (status, headers),
            BuiltResponse::NotModified(_) => panic!("expected an object response"),
        }
    }

    #[test]
    fn full_response_headers() {
        let path = MediaPath::new("videos/xyz.mp4");
        let request = HeaderMap::new();
        let cors = cors();
        let ctx = ResponseContext {
            path: &path,
            range: None,
            request_headers: &request,
            cors: &cors,
        };
        let (status, headers) = expect_object(build_object_response(object(5000, None), &ctx));

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "5000");
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(headers[header::ETAG], "\"abc123\"");
        assert_eq!(
            headers[header::CACHE_CONTROL],
            "public, max-age=86400, s-maxage=86400"
        );
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Authorization, Range"
        );
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(headers.get(header::CONTENT_RANGE).is_none());
    }

    #[test]
    fn ranged_response_is_partial_and_uncacheable() {
        let path = MediaPath::new("thumbnails/abc.jpg");
        let request = HeaderMap::new();
        let cors = cors();
        let ctx = ResponseContext {
            path: &path,
            range: Some(ByteRange {
                start: 100,
                end: None,
            }),
            request_headers: &request,
            cors: &cors,
        };
        let (status, headers) = expect_object(build_object_response(object(1024, None), &ctx));

        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 100-1023/1024");
        assert_eq!(headers[header::CONTENT_LENGTH], "924");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn store_span_wins_over_parsed_range() {
        let path = MediaPath::new("videos/xyz.mp4");
        let request = HeaderMap::new();
        let cors = cors();
        let ctx = ResponseContext {
            path: &path,
            range: Some(ByteRange {
                start: 0,
                end: Some(99_999),
            }),
            request_headers: &request,
            cors: &cors,
        };
        let span = ByteSpan {
            offset: 0,
            length: 5000,
        };
        let (_, headers) = expect_object(build_object_response(object(5000, Some(span)), &ctx));
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-4999/5000");
        assert_eq!(headers[header::CONTENT_LENGTH], "5000");
    }

    #[test]
    fn matching_etag_short_circuits() {
        let path = MediaPath::new("videos/xyz.mp4");
        let mut request = HeaderMap::new();
        request.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"abc123\""));
        let cors = cors();
        let ctx = ResponseContext {
            path: &path,
            range: None,
            request_headers: &request,
            cors: &cors,
        };
        match build_object_response(object(5000, None), &ctx) {
            BuiltResponse::NotModified(res) => {
                assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
                assert_eq!(res.headers()[header::CACHE_CONTROL], "public, max-age=60");
                assert_eq!(res.headers()[header::ETAG], "\"abc123\"");
                assert_eq!(res.headers()[header::CONTENT_TYPE], "video/mp4");
            }
            BuiltResponse::Object { .. } => panic!("expected 304"),
        }
    }

    #[test]
    fn allowed_origin_is_echoed_with_credentials() {
        let mut headers = HeaderMap::new();
        let origin = HeaderValue::from_static("http://localhost:5173");
        cors().apply(&mut headers, Some(&origin));
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5173");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let mut headers = HeaderMap::new();
        let evil = HeaderValue::from_static("https://evil.example");
        cors().apply(&mut headers, Some(&evil));
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[test]
    fn cached_replay_reapplies_per_request_headers() {
        let mut stored = HeaderMap::new();
        stored.insert(header::ETAG, HeaderValue::from_static("\"e1\""));
        stored.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("http://localhost:5173"));
        let stored = storable_headers(&stored);
        assert!(stored.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let cached = CachedResponse {
            status: StatusCode::OK,
            headers: stored,
            body: Bytes::from_static(b"data"),
        };
        let res = cached_response(cached.clone(), &HeaderMap::new(), &cors());
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[X_CACHE], "HIT");
        assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let mut conditional = HeaderMap::new();
        conditional.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"e1\""));
        let res = cached_response(cached, &conditional, &cors());
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn preflight_is_permissive_and_empty() {
        let res = preflight();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_MAX_AGE], "86400");
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Authorization, Range, Content-Type"
        );
    }
}
