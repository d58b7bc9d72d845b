//! MediaService: the collaborators one media request needs, injected once
//! at startup and shared through router state.

use crate::{
    errors::AppError,
    handlers::media_response::CorsPolicy,
    models::{
        media_path::MediaPath,
        object::{ObjectRange, StoredObject},
        range::ByteRange,
    },
    services::{
        auth_service::{AuthError, TokenVerifier, Viewer},
        cache_service::{CacheKey, CachedResponse, EdgeCache, OnComplete},
        storage_service::{ObjectStore, StoreError},
    },
};
use axum::http::{HeaderMap, Uri, header};
use std::{sync::Arc, time::Duration};
use url::Url;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct MediaService {
    pub store: Arc<dyn ObjectStore>,
    pub cache: Arc<dyn EdgeCache>,
    pub verifier: TokenVerifier,
    pub cors: CorsPolicy,
    /// Origin every cache key is built on.
    pub public_origin: Url,
    /// Objects above this size are streamed but never copied into the cache.
    pub cache_max_object_bytes: u64,
}

impl MediaService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn EdgeCache>,
        verifier: TokenVerifier,
        cors: CorsPolicy,
        public_origin: Url,
        cache_max_object_bytes: u64,
    ) -> Self {
        Self {
            store,
            cache,
            verifier,
            cors,
            public_origin,
            cache_max_object_bytes,
        }
    }

    /// Verify the bearer token when `path` is protected. Public paths yield
    /// `Ok(None)` without looking at the headers.
    pub fn authorize(&self, path: &MediaPath, headers: &HeaderMap) -> Result<Option<Viewer>, AuthError> {
        if path.is_public() {
            return Ok(None);
        }
        self.verifier
            .verify_header(headers.get(header::AUTHORIZATION))
            .map(Some)
    }

    pub fn cache_key(&self, uri: &Uri) -> CacheKey {
        CacheKey::new(&self.public_origin, uri.path())
    }

    /// Probe the edge cache. Backend failures count as a miss.
    pub async fn cached(&self, key: &CacheKey) -> Option<CachedResponse> {
        match self.cache.lookup(key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(key = %key, error = %err, "cache lookup failed");
                None
            }
        }
    }

    /// Fetch the object, whole or ranged.
    ///
    /// A ranged read goes to the store with the raw header first; if the
    /// store refuses that form, the parsed bounds are retried once as an
    /// explicit offset/length.
    pub async fn fetch(
        &self,
        key: &str,
        range: Option<(&str, ByteRange)>,
    ) -> Result<Option<StoredObject>, AppError> {
        let Some((raw, parsed)) = range else {
            return Ok(self.store.get(key, None).await?);
        };

        let native = ObjectRange::Header(raw.to_string());
        match self.store.get(key, Some(&native)).await {
            Ok(object) => Ok(object),
            Err(StoreError::InvalidObjectKey) => Err(AppError::not_found()),
            Err(err) => {
                debug!(key, error = %err, "native range read failed, retrying with offset");
                self.store
                    .get(key, Some(&parsed.to_object_range()))
                    .await
                    .map_err(|err| {
                        if matches!(
                            err,
                            StoreError::RangeNotSatisfiable { .. } | StoreError::UnsupportedRange(_)
                        ) {
                            warn!(key, range = raw, error = %err, "range request failed");
                            AppError::bad_request("Range request failed")
                        } else {
                            err.into()
                        }
                    })
            }
        }
    }

    /// Completion hook for a streamed full response: stores the collected
    /// body in a detached task. Failures are logged and go nowhere else.
    pub fn cache_writer(&self, key: CacheKey, snapshot: CachedResponse, ttl: Duration) -> OnComplete {
        let cache = self.cache.clone();
        Box::new(move |body| {
            tokio::spawn(async move {
                let len = body.len();
                let entry = CachedResponse { body, ..snapshot };
                match cache.store(&key, entry, ttl).await {
                    Ok(()) => info!(key = %key, bytes = len, "cached full response"),
                    Err(err) => warn!(key = %key, error = %err, "cache put failed"),
                }
            });
        })
    }
}
