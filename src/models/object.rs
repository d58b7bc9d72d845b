//! Represents a media object (blob) held by the backing object store.

use axum::http::{HeaderMap, HeaderValue, header};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, io};
use uuid::Uuid;

/// Streamed object payload. Never collected in full on the response path.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// Metadata row for a single object within a bucket.
///
/// The row describes the payload; the bytes themselves live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    pub content_language: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, unquoted.
    pub etag: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn http_metadata(&self) -> HttpMetadata {
        HttpMetadata {
            content_type: self.content_type.clone(),
            content_language: self.content_language.clone(),
            content_encoding: self.content_encoding.clone(),
            content_disposition: self.content_disposition.clone(),
            cache_control: self.cache_control.clone(),
        }
    }

    /// Strong validator in header form (`"<md5>"`).
    pub fn http_etag(&self) -> Option<String> {
        self.etag.as_ref().map(|etag| format!("\"{}\"", etag))
    }
}

/// Store-level HTTP metadata carried alongside an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpMetadata {
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
}

impl HttpMetadata {
    /// Copy every present field into `headers`, skipping values that are not
    /// valid header text.
    pub fn write_to(&self, headers: &mut HeaderMap) {
        let fields = [
            (header::CONTENT_TYPE, &self.content_type),
            (header::CONTENT_LANGUAGE, &self.content_language),
            (header::CONTENT_ENCODING, &self.content_encoding),
            (header::CONTENT_DISPOSITION, &self.content_disposition),
            (header::CACHE_CONTROL, &self.cache_control),
        ];
        for (name, value) in fields {
            if let Some(value) = value.as_deref() {
                if let Ok(value) = HeaderValue::from_str(value) {
                    headers.insert(name, value);
                }
            }
        }
    }
}

/// Range selector handed to an object store.
///
/// Backends must accept both forms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectRange {
    /// The raw `Range` header value, interpreted by the backend itself.
    Header(String),
    /// Explicit offset with an optional length (absent means to the end).
    Offset { offset: u64, length: Option<u64> },
}

/// Byte span actually served for a ranged read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

impl ByteSpan {
    /// Inclusive last byte index.
    pub fn last(&self) -> u64 {
        self.offset + self.length.saturating_sub(1)
    }
}

/// An object returned by the store, ready to be streamed out.
pub struct StoredObject {
    pub key: String,

    /// Total size of the object, not of the selected range.
    pub size: u64,

    /// Strong validator in header form, e.g. `"9e107d9d372bb6826bd81d3542a419d6"`.
    pub http_etag: Option<String>,

    pub http_metadata: HttpMetadata,

    /// Set when the body is a sub-range of the object.
    pub range: Option<ByteSpan>,

    pub body: ObjectBody,
}

impl StoredObject {
    pub fn write_http_metadata(&self, headers: &mut HeaderMap) {
        self.http_metadata.write_to(headers);
    }
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("http_etag", &self.http_etag)
            .field("http_metadata", &self.http_metadata)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_http_metadata_skips_missing_fields() {
        let meta = HttpMetadata {
            content_type: Some("video/mp4".into()),
            content_language: Some("en".into()),
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        meta.write_to(&mut headers);

        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        assert_eq!(headers.get(header::CONTENT_LANGUAGE).unwrap(), "en");
        assert!(headers.get(header::CACHE_CONTROL).is_none());
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn byte_span_last_is_inclusive() {
        let span = ByteSpan {
            offset: 100,
            length: 50,
        };
        assert_eq!(span.last(), 149);
    }
}
