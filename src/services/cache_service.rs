//! Shared edge cache for full (non-ranged) media responses.
//!
//! Entries are keyed by the configured public origin plus the request path,
//! with the query string dropped so signing artifacts never split or leak
//! across callers. The in-process cache is bounded by entry count and by
//! total body bytes; the least recently used entries go first.

use crate::models::object::ObjectBody;
use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use lru::LruCache;
use parking_lot::Mutex;
use std::{
    fmt, io,
    num::NonZeroUsize,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use thiserror::Error;
use url::Url;

/// Upper bound on the buffer reserved before the first chunk arrives.
const TEE_INITIAL_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry for `{0}` is too large")]
    TooLarge(String),
    #[error("cache backend unavailable: {0}")]
    Backend(String),
}

/// Normalized cache key: `scheme://host/path`, never a query or fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Join `path` onto the public `origin`. Client-supplied `Host` and
    /// forwarding headers never reach the key.
    pub fn new(origin: &Url, path: &str) -> Self {
        let mut url = origin.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete response as held by the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[async_trait]
pub trait EdgeCache: Send + Sync {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError>;

    /// Store `response` for `ttl`. Concurrent writers are last-write-wins.
    async fn store(&self, key: &CacheKey, response: CachedResponse, ttl: Duration) -> Result<(), CacheError>;
}

struct Entry {
    response: CachedResponse,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn size(&self) -> usize {
        self.response.body.len()
    }
}

struct Slots {
    entries: LruCache<CacheKey, Entry>,
    used_bytes: usize,
}

impl Slots {
    fn remove(&mut self, key: &CacheKey) {
        if let Some(old) = self.entries.pop(key) {
            self.used_bytes -= old.size();
        }
    }

    fn evict_lru(&mut self) -> bool {
        match self.entries.pop_lru() {
            Some((_, old)) => {
                self.used_bytes -= old.size();
                true
            }
            None => false,
        }
    }
}

/// Limits for [`MemoryEdgeCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: NonZeroUsize,
    /// Sum of all cached bodies.
    pub capacity_bytes: usize,
    /// Largest single body accepted.
    pub max_entry_bytes: usize,
}

/// In-process LRU cache shared by every request of this server.
pub struct MemoryEdgeCache {
    slots: Mutex<Slots>,
    capacity_bytes: usize,
    max_entry_bytes: usize,
}

impl MemoryEdgeCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: LruCache::new(limits.max_entries),
                used_bytes: 0,
            }),
            capacity_bytes: limits.capacity_bytes,
            max_entry_bytes: limits.max_entry_bytes.min(limits.capacity_bytes),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    #[cfg(test)]
    pub fn used_bytes(&self) -> usize {
        self.slots.lock().used_bytes
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots
            .lock()
            .entries
            .peek(key)
            .map(|entry| entry.expires_at > Utc::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        let mut slots = self.slots.lock();
        let expired = match slots.entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => return Ok(Some(entry.response.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            slots.remove(key);
        }
        Ok(None)
    }

    async fn store(&self, key: &CacheKey, response: CachedResponse, ttl: Duration) -> Result<(), CacheError> {
        let size = response.body.len();
        if size > self.max_entry_bytes {
            return Err(CacheError::TooLarge(key.to_string()));
        }
        let ttl = chrono::Duration::from_std(ttl).map_err(|err| CacheError::Backend(err.to_string()))?;
        let entry = Entry {
            response,
            expires_at: Utc::now() + ttl,
        };

        let mut slots = self.slots.lock();
        slots.remove(key);
        while slots.used_bytes + size > self.capacity_bytes {
            if !slots.evict_lru() {
                break;
            }
        }
        if let Some((_, evicted)) = slots.entries.push(key.clone(), entry) {
            slots.used_bytes -= evicted.size();
        }
        slots.used_bytes += size;
        Ok(())
    }
}

/// Callback receiving the fully streamed body.
pub type OnComplete = Box<dyn FnOnce(Bytes) + Send>;

/// Forwards an object body unchanged while keeping a copy for the cache.
///
/// The copy is handed to `on_complete` only if the stream ends cleanly with
/// exactly `expected` bytes. Errors, a size mismatch or the client dropping
/// the response all discard the copy.
pub struct CacheTee {
    inner: ObjectBody,
    buffer: Option<BytesMut>,
    expected: usize,
    on_complete: Option<OnComplete>,
}

impl CacheTee {
    pub fn new(inner: ObjectBody, expected: usize, on_complete: OnComplete) -> Self {
        Self {
            inner,
            buffer: Some(BytesMut::with_capacity(expected.min(TEE_INITIAL_CAPACITY))),
            expected,
            on_complete: Some(on_complete),
        }
    }
}

impl Stream for CacheTee {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(buffer) = this.buffer.as_mut() {
                    if buffer.len() + chunk.len() > this.expected {
                        this.buffer = None;
                    } else {
                        buffer.extend_from_slice(&chunk);
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.buffer = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let (Some(buffer), Some(on_complete)) = (this.buffer.take(), this.on_complete.take()) {
                    if buffer.len() == this.expected {
                        on_complete(buffer.freeze());
                    }
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
