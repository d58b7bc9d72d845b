//! In-memory `ObjectStore` and a failing `EdgeCache` for handler and service tests.

use crate::{
    models::object::{HttpMetadata, ObjectRange, StoredObject},
    services::{
        cache_service::{CacheError, CacheKey, CachedResponse, EdgeCache},
        storage_service::{ObjectStore, StoreError, StoreResult, resolve_range},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, (Bytes, HttpMetadata)>,
    gets: AtomicUsize,
    reject_header_ranges: bool,
}

impl MemoryObjectStore {
    /// Make the native (raw header) range form fail, as some backends do.
    pub fn rejecting_header_ranges(mut self) -> Self {
        self.reject_header_ranges = true;
        self
    }

    pub fn insert(&self, key: &str, data: Bytes, content_type: &str) {
        let metadata = HttpMetadata {
            content_type: Some(content_type.into()),
            ..Default::default()
        };
        self.objects.insert(key.to_string(), (data, metadata));
    }

    /// Number of `get` calls received so far.
    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str, range: Option<&ObjectRange>) -> StoreResult<Option<StoredObject>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let (true, Some(ObjectRange::Header(value))) = (self.reject_header_ranges, range) {
            return Err(StoreError::UnsupportedRange(value.clone()));
        }
        let Some(entry) = self.objects.get(key) else {
            return Ok(None);
        };
        let (data, metadata) = entry.value().clone();
        drop(entry);

        let size = data.len() as u64;
        let span = range.map(|range| resolve_range(range, size)).transpose()?;
        let body = match span {
            Some(span) => data.slice(span.offset as usize..(span.offset + span.length) as usize),
            None => data.clone(),
        };
        // Two chunks, so consumers are exercised on multi-chunk bodies.
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];

        Ok(Some(StoredObject {
            key: key.to_string(),
            size,
            http_etag: Some(format!("\"{:x}\"", md5::compute(&data))),
            http_metadata: metadata,
            range: span,
            body: futures::stream::iter(chunks).boxed(),
        }))
    }
}

/// Edge cache whose backend is always down. Counts calls.
#[derive(Default)]
pub struct FailingEdgeCache {
    lookups: AtomicUsize,
    stores: AtomicUsize,
}

impl FailingEdgeCache {
    pub fn lookup_calls(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn store_calls(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EdgeCache for FailingEdgeCache {
    async fn lookup(&self, _key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("lookup refused".into()))
    }

    async fn store(&self, _key: &CacheKey, _response: CachedResponse, _ttl: Duration) -> Result<(), CacheError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("store refused".into()))
    }
}
