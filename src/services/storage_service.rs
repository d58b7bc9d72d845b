//! src/services/storage_service.rs
//!
//! Object store access. `ObjectStore` is the read seam the request handler
//! depends on; `DiskObjectStore` implements it with SQLite metadata and
//! on-disk payloads sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::models::{
    bucket::Bucket,
    object::{ByteSpan, HttpMetadata, ObjectRange, ObjectRecord, StoredObject},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },
    #[error("unsupported range `{0}`")]
    UnsupportedRange(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to a bucket of media objects.
///
/// `get` returns `Ok(None)` when the key does not exist. A ranged read
/// returns an object whose `range` is set and whose body covers only that
/// span.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str, range: Option<&ObjectRange>) -> StoreResult<Option<StoredObject>>;
}

/// SQLite + local disk implementation of [`ObjectStore`], bound to one bucket.
#[derive(Clone)]
pub struct DiskObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,
}

impl DiskObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Rejects empty or oversized keys, keys beginning with `/`, containing
    /// `..`, backslashes or control characters.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard directories from MD5(bucket/key).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self) -> StoreResult<Bucket> {
        sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(&self.bucket)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::BucketNotFound(self.bucket.clone()))
    }

    /// Fetch the bucket row, creating it (and its directory) when missing.
    pub async fn ensure_bucket(&self) -> StoreResult<Bucket> {
        match self.fetch_bucket().await {
            Ok(bucket) => return Ok(bucket),
            Err(StoreError::BucketNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        fs::create_dir_all(self.bucket_root()).await?;
        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: self.bucket.clone(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT OR IGNORE INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await?;
        info!(bucket = %bucket.name, "created bucket");

        self.fetch_bucket().await
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, bucket_id, key, content_type, content_language, content_encoding,
                    content_disposition, cache_control, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Stream an object onto disk and upsert its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5 (the ETag) and size while streaming.
    /// - Fsyncs, then renames into the final location.
    ///
    /// Temp files are removed on every error path.
    pub async fn put_object_stream<S>(
        &self,
        key: &str,
        metadata: HttpMetadata,
        stream: S,
    ) -> StoreResult<ObjectRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_key_safe(key)?;
        let bucket = self.ensure_bucket().await?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        let record = sqlx::query_as::<_, ObjectRecord>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, content_language, content_encoding,
                content_disposition, cache_control, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                content_language = excluded.content_language,
                content_encoding = excluded.content_encoding,
                content_disposition = excluded.content_disposition,
                cache_control = excluded.cache_control,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, content_language, content_encoding,
                      content_disposition, cache_control, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(metadata.content_type)
        .bind(metadata.content_language)
        .bind(metadata.content_encoding)
        .bind(metadata.content_disposition)
        .bind(metadata.cache_control)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match record {
            Ok(record) => Ok(record),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    /// Load every regular file below `root` into the bucket, keyed by its
    /// `/`-separated path relative to `root`. Content type is guessed from
    /// the extension. Returns the number of objects written.
    pub async fn import_directory(&self, root: &Path) -> StoreResult<usize> {
        let mut imported = 0;
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let metadata = HttpMetadata {
                content_type: mime_guess::from_path(entry.path())
                    .first()
                    .map(|mime| mime.essence_str().to_string()),
                ..Default::default()
            };
            let file = File::open(entry.path()).await?;
            let record = self
                .put_object_stream(&key, metadata, ReaderStream::new(file))
                .await?;
            debug!(key = %record.key, size = record.size_bytes, "imported object");
            imported += 1;
        }
        Ok(imported)
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn get(&self, key: &str, range: Option<&ObjectRange>) -> StoreResult<Option<StoredObject>> {
        Self::ensure_key_safe(key)?;
        let bucket = self.fetch_bucket().await?;
        let Some(record) = self.fetch_object(&bucket, key).await? else {
            return Ok(None);
        };

        let size = record.size_bytes.max(0) as u64;
        let span = range.map(|range| resolve_range(range, size)).transpose()?;

        let file_path = self.object_path(key);
        let mut file = match File::open(&file_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(key, path = %file_path.display(), "metadata present but payload missing");
                return Ok(None);
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        let body = match span {
            Some(span) => {
                file.seek(SeekFrom::Start(span.offset)).await?;
                ReaderStream::new(file.take(span.length)).boxed()
            }
            None => ReaderStream::new(file).boxed(),
        };

        Ok(Some(StoredObject {
            key: record.key.clone(),
            size,
            http_etag: record.http_etag(),
            http_metadata: record.http_metadata(),
            range: span,
            body,
        }))
    }
}

/// Resolve either range form against an object of `size` bytes.
pub(crate) fn resolve_range(range: &ObjectRange, size: u64) -> StoreResult<ByteSpan> {
    match range {
        ObjectRange::Header(value) => resolve_header_range(value, size),
        ObjectRange::Offset { offset, length } => {
            if *offset >= size || *length == Some(0) {
                return Err(StoreError::RangeNotSatisfiable { size });
            }
            let available = size - offset;
            Ok(ByteSpan {
                offset: *offset,
                length: length.map(|len| len.min(available)).unwrap_or(available),
            })
        }
    }
}

/// Native header interpretation: `bytes=a-b`, `bytes=a-` and `bytes=-n`.
fn resolve_header_range(value: &str, size: u64) -> StoreResult<ByteSpan> {
    let unsupported = || StoreError::UnsupportedRange(value.to_string());
    let spec = value.trim().strip_prefix("bytes=").ok_or_else(unsupported)?;
    if spec.contains(',') {
        return Err(unsupported());
    }
    let (start, end) = spec.split_once('-').ok_or_else(unsupported)?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| unsupported())?;
        if suffix == 0 || size == 0 {
            return Err(StoreError::RangeNotSatisfiable { size });
        }
        let length = suffix.min(size);
        return Ok(ByteSpan {
            offset: size - length,
            length,
        });
    }

    let start: u64 = start.parse().map_err(|_| unsupported())?;
    if start >= size {
        return Err(StoreError::RangeNotSatisfiable { size });
    }
    let last = if end.is_empty() {
        size - 1
    } else {
        let end: u64 = end.parse().map_err(|_| unsupported())?;
        if end < start {
            return Err(unsupported());
        }
        end.min(size - 1)
    };
    Ok(ByteSpan {
        offset: start,
        length: last - start + 1,
    })
}
