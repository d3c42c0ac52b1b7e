//! src/services/file_storage.rs
//!
//! FileStorage: the filesystem-backed [`ObjectStorage`]. Buckets are the
//! immediate child directories of `base_path` and object keys map onto
//! nested paths beneath them: `base_path/{bucket}/{key segments...}`.
//!
//! There are no sidecar files. Size and modification time come from `stat`,
//! the content type from the key's extension, and the ETag from hashing the
//! content on every request.
//!
//! Writes stream into a hidden staging file next to the destination which is
//! fsynced and then renamed into place, so readers observe either the old or
//! the new revision of an object and never a torn one.

use crate::{
    models::object::{ObjectMetadata, content_type_for_key},
    services::storage::{
        ContentStream, ListObjectsParams, ObjectBody, ObjectStorage, StorageError,
        StorageResult, UserMetadata,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// File name prefix for in-flight writes. Never listed, never a valid key segment.
const STAGING_PREFIX: &str = ".staging-";
const MAX_OBJECT_KEY_LEN: usize = 1024;
const HASH_BUF_LEN: usize = 64 * 1024;
/// Attempts at creating a staging file while deletes prune its directory.
const STAGING_ATTEMPTS: usize = 8;

#[derive(Clone, Debug)]
pub struct FileStorage {
    /// Root directory that holds one sub-directory per bucket.
    base_path: PathBuf,
}

/// A directory entry met while walking a bucket.
struct WalkEntry {
    path: PathBuf,
    key: String,
    is_dir: bool,
    is_file: bool,
}

impl FileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the base directory if needed and return a storage rooted there.
    pub async fn open(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let storage = Self::new(base_path);
        fs::create_dir_all(&storage.base_path).await?;
        Ok(storage)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// A bucket name must be exactly one normal path component.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        if name.is_empty() {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "must not be empty".into(),
            });
        }
        if name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
            || Path::new(name).has_root()
        {
            return Err(StorageError::PathTraversalRejected(name.to_string()));
        }
        if name.bytes().any(|b| b.is_ascii_control()) || name.starts_with(STAGING_PREFIX) {
            return Err(StorageError::InvalidBucketName {
                name: name.to_string(),
                reason: "contains reserved or control characters".into(),
            });
        }
        Ok(())
    }

    /// Reject keys that could resolve outside their bucket, or that would
    /// alias another key once the filesystem normalises them.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.starts_with('/') || Path::new(key).has_root() {
            return Err(StorageError::PathTraversalRejected(key.to_string()));
        }
        if key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::PathTraversalRejected(key.to_string()));
        }
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey(key.to_string()));
        }
        let bad_segment = key.split('/').any(|segment| {
            segment.is_empty() || segment == "." || segment.starts_with(STAGING_PREFIX)
        });
        if bad_segment || key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StorageError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Physical directory for a bucket. Does not check for existence.
    fn bucket_root(&self, bucket: &str) -> StorageResult<PathBuf> {
        self.ensure_bucket_name_safe(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    /// Physical path for an object, built segment by segment.
    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        self.ensure_key_safe(key)?;
        let mut path = self.bucket_root(bucket)?;
        path.extend(key.split('/'));
        Ok(path)
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<PathBuf> {
        let root = self.bucket_root(bucket)?;
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(StorageError::BucketNotFound(bucket.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(bucket.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Open an existing regular file for an object, with its stat taken
    /// from the same handle.
    async fn open_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(File, std::fs::Metadata)> {
        let path = self.object_path(bucket, key)?;
        let file = File::open(&path)
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(object_not_found(bucket, key));
        }
        Ok((file, meta))
    }

    /// Stream `content` into a staging file beside `dest`, fsync it, then
    /// rename it over `dest`. The staging file is removed on any failure.
    async fn write_staged(
        &self,
        key: &str,
        dest: &Path,
        content: ContentStream,
    ) -> StorageResult<ObjectMetadata> {
        let parent = dest.parent().ok_or_else(|| {
            StorageError::Io(io::Error::other("object path missing parent directory"))
        })?;
        let tmp_path = parent.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        let file = create_staging_file(parent, &tmp_path).await?;

        let (size, etag, modified) = match stream_to_file(file, content).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, dest).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(dest).await?;
                fs::rename(&tmp_path, dest).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        Ok(ObjectMetadata {
            key: key.to_string(),
            size,
            last_modified: DateTime::<Utc>::from(modified),
            content_type: content_type_for_key(key).to_string(),
            etag,
        })
    }

    /// Read one directory level of a bucket with staging files and non-UTF-8
    /// names left out.
    ///
    /// Directories sort as `name/`, which makes a depth-first walk visit keys
    /// in plain lexicographic order (`a.txt` before `a/1`).
    async fn read_level(&self, dir: &Path, dir_key: &str) -> StorageResult<Vec<WalkEntry>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut level = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!("skipping non UTF-8 entry {:?} in {}", raw, dir.display());
                    continue;
                }
            };
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }
            let file_type = entry.file_type().await?;
            let key = if dir_key.is_empty() {
                name
            } else {
                format!("{}/{}", dir_key, name)
            };
            level.push(WalkEntry {
                path: entry.path(),
                key,
                is_dir: file_type.is_dir(),
                is_file: file_type.is_file(),
            });
        }
        level.sort_by_cached_key(|entry| {
            if entry.is_dir {
                format!("{}/", entry.key)
            } else {
                entry.key.clone()
            }
        });
        Ok(level)
    }

    /// Remove empty directories from `start` upward, stopping below `stop`.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for FileStorage {
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => buckets.push(name),
                Err(raw) => debug!("skipping non UTF-8 bucket directory {:?}", raw),
            }
        }
        Ok(buckets)
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let root = self.bucket_root(bucket)?;
        fs::create_dir_all(&root).await?;
        debug!(bucket, "bucket created");
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let root = self.bucket_root(bucket)?;
        match fs::remove_dir_all(&root).await {
            Ok(()) => debug!(bucket, "bucket deleted"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(bucket, "bucket already absent");
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        Ok(())
    }

    /// Depth-first walk of the bucket in lexicographic key order, so the last
    /// returned key works as the next `marker`.
    async fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StorageResult<Vec<String>> {
        let root = self.ensure_bucket_exists(bucket).await?;
        let mut keys = Vec::new();
        if params.max_keys == 0 {
            return Ok(keys);
        }

        let mut pending: Vec<WalkEntry> = self.read_level(&root, "").await?;
        pending.reverse();

        while let Some(entry) = pending.pop() {
            if entry.is_dir {
                let dir_prefix = format!("{}/", entry.key);
                if !params.prefix.starts_with(&dir_prefix) && !dir_prefix.starts_with(&params.prefix)
                {
                    continue;
                }
                let mut level = self.read_level(&entry.path, &entry.key).await?;
                level.reverse();
                pending.extend(level);
                continue;
            }
            if !entry.is_file || !entry.key.starts_with(&params.prefix) {
                continue;
            }
            if !params.marker.is_empty() && entry.key.as_str() <= params.marker.as_str() {
                continue;
            }
            keys.push(entry.key);
            if keys.len() >= params.max_keys {
                break;
            }
        }

        Ok(keys)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content: ContentStream,
        metadata: UserMetadata,
    ) -> StorageResult<ObjectMetadata> {
        let dest = self.object_path(bucket, key)?;
        if !metadata.is_empty() {
            // User metadata has no on-disk home; it is accepted and dropped.
            debug!(bucket, key, count = metadata.len(), "discarding user metadata");
        }

        let object = self.write_staged(key, &dest, content).await?;
        debug!(bucket, key, size = object.size, "object stored");
        Ok(object)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectMetadata, ObjectBody)> {
        let (mut file, stat) = self.open_object(bucket, key).await?;
        let etag = hash_file(&mut file).await?;
        file.seek(SeekFrom::Start(0)).await?;
        let metadata = object_metadata(key, &stat, etag)?;
        Ok((metadata, Box::pin(file)))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        let stat = fs::symlink_metadata(&path)
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;
        if stat.is_dir() {
            return Err(object_not_found(bucket, key));
        }

        fs::remove_file(&path)
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;
        debug!(bucket, key, "object deleted");

        if let Some(parent) = path.parent() {
            let root = self.bucket_root(bucket)?;
            self.prune_empty_dirs(parent, &root).await;
        }
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        let (mut file, stat) = self.open_object(bucket, key).await?;
        let etag = hash_file(&mut file).await?;
        object_metadata(key, &stat, etag)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<ObjectMetadata> {
        let dest = self.object_path(dst_bucket, dst_key)?;
        let (source, _) = self.open_object(src_bucket, src_key).await?;

        let content = ReaderStream::new(source).boxed();
        let object = self.write_staged(dst_key, &dest, content).await?;
        debug!(
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
            size = object.size,
            "object copied"
        );
        Ok(object)
    }

    async fn check_ready(&self) -> StorageResult<()> {
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let removed = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::other("probe file content mismatch")));
        }
        removed?;
        Ok(())
    }
}

/// Create `parent` and a fresh staging file inside it.
///
/// A delete of a sibling key may prune `parent` between the two steps, in
/// which case the directory is recreated and the open attempted again.
async fn create_staging_file(parent: &Path, tmp_path: &Path) -> io::Result<File> {
    let mut attempt = 1;
    loop {
        let created = match fs::create_dir_all(parent).await {
            Ok(()) => File::create(tmp_path).await,
            Err(err) => Err(err),
        };
        match created {
            Err(err) if err.kind() == ErrorKind::NotFound && attempt < STAGING_ATTEMPTS => {
                debug!("staging directory {} vanished, retrying", parent.display());
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Write every chunk of `content` to `file` and fsync it.
///
/// Returns the byte count, the hex MD5 of what was written, and the file's
/// modification time.
async fn stream_to_file(
    mut file: File,
    mut content: ContentStream,
) -> io::Result<(u64, String, SystemTime)> {
    let mut size: u64 = 0;
    let mut digest = Context::new();
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    let modified = file.metadata().await?.modified()?;
    Ok((size, format!("{:x}", digest.compute()), modified))
}

/// Hex MD5 of everything readable from the current position of `file`.
async fn hash_file(file: &mut File) -> io::Result<String> {
    let mut digest = Context::new();
    let mut buf = vec![0u8; HASH_BUF_LEN];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}

fn object_metadata(
    key: &str,
    stat: &std::fs::Metadata,
    etag: String,
) -> StorageResult<ObjectMetadata> {
    Ok(ObjectMetadata {
        key: key.to_string(),
        size: stat.len(),
        last_modified: DateTime::<Utc>::from(stat.modified()?),
        content_type: content_type_for_key(key).to_string(),
        etag,
    })
}

fn object_not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

/// Missing files (or a file standing where a directory is expected) mean
/// the object does not exist; anything else is a real I/O failure.
fn not_found_or_io(err: io::Error, bucket: &str, key: &str) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory => object_not_found(bucket, key),
        _ => StorageError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    async fn storage_with_bucket(bucket: &str) -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path().join("data")).await.unwrap();
        storage.create_bucket(bucket).await.unwrap();
        (dir, storage)
    }

    fn content(chunks: &[&'static [u8]]) -> ContentStream {
        let chunks: Vec<io::Result<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        stream::iter(chunks).boxed()
    }

    async fn put(storage: &FileStorage, bucket: &str, key: &str, data: &'static [u8]) {
        storage
            .put_object(bucket, key, content(&[data]), UserMetadata::new())
            .await
            .unwrap();
    }

    async fn read_all(storage: &FileStorage, bucket: &str, key: &str) -> Vec<u8> {
        let (_, mut body) = storage.get_object(bucket, key).await.unwrap();
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        out
    }

    fn list_params(prefix: &str, marker: &str, max_keys: usize) -> ListObjectsParams {
        ListObjectsParams {
            prefix: prefix.into(),
            marker: marker.into(),
            max_keys,
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_identical_bytes() {
        let (_dir, storage) = storage_with_bucket("photos").await;
        storage
            .put_object(
                "photos",
                "2025/trip/cat.jpg",
                content(&[b"hello ", b"chunked ", b"world"]),
                UserMetadata::new(),
            )
            .await
            .unwrap();

        let (meta, mut body) = storage.get_object("photos", "2025/trip/cat.jpg").await.unwrap();
        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"hello chunked world");
        assert_eq!(meta.size, out.len() as u64);
        assert_eq!(meta.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn head_reports_md5_etag_and_size() {
        let (_dir, storage) = storage_with_bucket("docs").await;
        let data = b"some document body";
        let stored = storage
            .put_object("docs", "notes.txt", content(&[data]), UserMetadata::new())
            .await
            .unwrap();

        let head = storage.head_object("docs", "notes.txt").await.unwrap();
        let expected = format!("{:x}", md5::compute(data));
        assert_eq!(head.etag, expected);
        assert_eq!(head.size, data.len() as u64);
        assert_eq!(head.content_type, "text/plain");
        assert_eq!(stored.etag, head.etag);
        assert_eq!(stored.size, head.size);
    }

    #[tokio::test]
    async fn put_overwrites_and_etag_follows_content() {
        let (_dir, storage) = storage_with_bucket("b1").await;
        put(&storage, "b1", "k", b"first").await;
        put(&storage, "b1", "k", b"second revision").await;

        assert_eq!(read_all(&storage, "b1", "k").await, b"second revision");
        let head = storage.head_object("b1", "k").await.unwrap();
        assert_eq!(head.etag, format!("{:x}", md5::compute(b"second revision")));
    }

    #[tokio::test]
    async fn put_discards_user_metadata_without_error() {
        let (_dir, storage) = storage_with_bucket("b1").await;
        let mut meta = UserMetadata::new();
        meta.insert("X-Amz-Meta-Author".into(), "alice".into());
        storage
            .put_object("b1", "k.bin", content(&[b"x"]), meta)
            .await
            .unwrap();

        let bucket_root = storage.base_path().join("b1");
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&bucket_root).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(names, vec!["k.bin".to_string()]);
    }

    #[tokio::test]
    async fn failed_upload_leaves_no_staging_file_and_keeps_old_object() {
        let (_dir, storage) = storage_with_bucket("b1").await;
        put(&storage, "b1", "k", b"original").await;

        let broken: ContentStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("client went away")),
        ])
        .boxed();
        let err = storage
            .put_object("b1", "k", broken, UserMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        assert_eq!(read_all(&storage, "b1", "k").await, b"original");
        let mut entries = fs::read_dir(storage.base_path().join("b1")).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn put_and_copy_create_missing_bucket_directories() {
        let (_dir, storage) = storage_with_bucket("present").await;
        storage
            .put_object("fresh", "nested/k", content(&[b"hello"]), UserMetadata::new())
            .await
            .unwrap();
        assert_eq!(read_all(&storage, "fresh", "nested/k").await, b"hello");

        storage
            .copy_object("fresh", "nested/k", "other", "copy")
            .await
            .unwrap();
        assert_eq!(read_all(&storage, "other", "copy").await, b"hello");

        let mut buckets = storage.list_buckets().await.unwrap();
        buckets.sort();
        assert_eq!(buckets, vec!["fresh", "other", "present"]);
    }

    #[tokio::test]
    async fn list_objects_filters_by_prefix_and_truncates() {
        let (_dir, storage) = storage_with_bucket("b").await;
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            put(&storage, "b", key, b"x").await;
        }

        let keys = storage
            .list_objects("b", &list_params("a/", "", 2))
            .await
            .unwrap();
        assert_eq!(keys, vec!["a/1", "a/2"]);
    }

    #[tokio::test]
    async fn list_objects_marker_resumes_after_last_key() {
        let (_dir, storage) = storage_with_bucket("b").await;
        for key in ["a/1", "a/2", "a/3", "b/1", "top.txt"] {
            put(&storage, "b", key, b"x").await;
        }

        let all = storage
            .list_objects("b", &list_params("", "", 1000))
            .await
            .unwrap();
        assert_eq!(all, vec!["a/1", "a/2", "a/3", "b/1", "top.txt"]);

        let rest = storage
            .list_objects("b", &list_params("", "a/2", 1000))
            .await
            .unwrap();
        assert_eq!(rest, vec!["a/3", "b/1", "top.txt"]);

        let none = storage
            .list_objects("b", &list_params("", "", 0))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn list_objects_walks_in_key_order_across_directories() {
        let (_dir, storage) = storage_with_bucket("b").await;
        for key in ["a/1", "a.txt", "a-z", "a/0/deep"] {
            put(&storage, "b", key, b"x").await;
        }

        let all = storage
            .list_objects("b", &list_params("a", "", 1000))
            .await
            .unwrap();
        assert_eq!(all, vec!["a-z", "a.txt", "a/0/deep", "a/1"]);

        let resumed = storage
            .list_objects("b", &list_params("a", "a.txt", 1))
            .await
            .unwrap();
        assert_eq!(resumed, vec!["a/0/deep"]);
    }

    #[tokio::test]
    async fn list_objects_skips_staging_files() {
        let (_dir, storage) = storage_with_bucket("b").await;
        put(&storage, "b", "real", b"x").await;
        fs::write(storage.base_path().join("b").join(".staging-inflight"), b"partial")
            .await
            .unwrap();

        let keys = storage
            .list_objects("b", &list_params("", "", 1000))
            .await
            .unwrap();
        assert_eq!(keys, vec!["real"]);
    }

    #[tokio::test]
    async fn list_objects_in_missing_bucket_fails() {
        let (_dir, storage) = storage_with_bucket("b").await;
        let err = storage
            .list_objects("nope", &list_params("", "", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected_without_touching_disk() {
        let (dir, storage) = storage_with_bucket("b").await;

        let err = storage
            .put_object("b", "../escape", content(&[b"x"]), UserMetadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PathTraversalRejected(_)));
        assert!(!storage.base_path().join("escape").exists());
        assert!(!dir.path().join("escape").exists());

        for key in ["a/../../escape", "/etc/passwd"] {
            let err = storage.head_object("b", key).await.unwrap_err();
            assert!(matches!(err, StorageError::PathTraversalRejected(_)), "{key}");
        }

        let err = storage.delete_bucket("..").await.unwrap_err();
        assert!(matches!(err, StorageError::PathTraversalRejected(_)));
        assert!(storage.base_path().exists());
    }

    #[tokio::test]
    async fn malformed_keys_are_rejected() {
        let (_dir, storage) = storage_with_bucket("b").await;
        for key in ["", "a//b", "a/./b", "dir/", ".staging-x", "a\\b"] {
            let err = storage
                .put_object("b", key, content(&[b"x"]), UserMetadata::new())
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidObjectKey(_)), "{key:?}");
        }

        let err = storage.create_bucket("").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidBucketName { .. }));
    }

    #[tokio::test]
    async fn bucket_lifecycle() {
        let (_dir, storage) = storage_with_bucket("first").await;
        storage.create_bucket("first").await.unwrap();
        storage.create_bucket("second").await.unwrap();
        fs::write(storage.base_path().join("stray-file"), b"x")
            .await
            .unwrap();

        let mut buckets = storage.list_buckets().await.unwrap();
        buckets.sort();
        assert_eq!(buckets, vec!["first", "second"]);

        put(&storage, "first", "deep/nested/key", b"x").await;
        storage.delete_bucket("first").await.unwrap();
        let buckets = storage.list_buckets().await.unwrap();
        assert_eq!(buckets, vec!["second"]);

        storage.delete_bucket("first").await.unwrap();
    }

    #[tokio::test]
    async fn delete_object_is_strict_and_prunes_empty_dirs() {
        let (_dir, storage) = storage_with_bucket("b").await;
        put(&storage, "b", "x/y/z.txt", b"x").await;

        storage.delete_object("b", "x/y/z.txt").await.unwrap();
        assert!(!storage.base_path().join("b").join("x").exists());
        assert!(storage.base_path().join("b").exists());

        let err = storage.delete_object("b", "x/y/z.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn directories_are_not_objects() {
        let (_dir, storage) = storage_with_bucket("b").await;
        put(&storage, "b", "dir/file", b"x").await;

        assert!(matches!(
            storage.get_object("b", "dir").await.err().unwrap(),
            StorageError::ObjectNotFound { .. }
        ));
        assert!(matches!(
            storage.delete_object("b", "dir").await.unwrap_err(),
            StorageError::ObjectNotFound { .. }
        ));
        assert!(matches!(
            storage.head_object("b", "dir/file/below").await.unwrap_err(),
            StorageError::ObjectNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn copy_creates_parents_and_duplicates_bytes() {
        let (_dir, storage) = storage_with_bucket("src").await;
        storage.create_bucket("dst").await.unwrap();
        put(&storage, "src", "a.png", b"\x89PNG payload").await;

        let copied = storage
            .copy_object("src", "a.png", "dst", "backup/2025/a.png")
            .await
            .unwrap();

        assert_eq!(read_all(&storage, "dst", "backup/2025/a.png").await, b"\x89PNG payload");
        let source = storage.head_object("src", "a.png").await.unwrap();
        assert_eq!(copied.etag, source.etag);
        assert_eq!(copied.content_type, "image/png");
    }

    #[tokio::test]
    async fn copy_from_missing_source_leaves_destination_untouched() {
        let (_dir, storage) = storage_with_bucket("b").await;
        put(&storage, "b", "dest", b"keep me").await;

        let err = storage
            .copy_object("b", "missing", "b", "dest")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { key, .. } if key == "missing"));
        assert_eq!(read_all(&storage, "b", "dest").await, b"keep me");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_pruning_does_not_break_sibling_put() {
        let (_dir, storage) = storage_with_bucket("b").await;
        for _ in 0..500 {
            put(&storage, "b", "x/victim", b"old").await;

            let deleter = {
                let storage = storage.clone();
                tokio::spawn(async move { storage.delete_object("b", "x/victim").await })
            };
            let writer = {
                let storage = storage.clone();
                tokio::spawn(async move {
                    storage
                        .put_object("b", "x/other", content(&[b"new"]), UserMetadata::new())
                        .await
                })
            };

            deleter.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();
            assert_eq!(read_all(&storage, "b", "x/other").await, b"new");
            storage.delete_object("b", "x/other").await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_a_torn_overwrite() {
        const SMALL: &[u8] = b"small revision";
        const LARGE: &[u8] = &[b'z'; 256 * 1024];

        let (_dir, storage) = storage_with_bucket("b").await;
        put(&storage, "b", "hot", SMALL).await;

        let writer = {
            let storage = storage.clone();
            tokio::spawn(async move {
                for round in 0..200 {
                    let data = if round % 2 == 0 { LARGE } else { SMALL };
                    let chunks = content(&[&data[..data.len() / 2], &data[data.len() / 2..]]);
                    storage
                        .put_object("b", "hot", chunks, UserMetadata::new())
                        .await
                        .unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let (meta, mut body) = storage.get_object("b", "hot").await.unwrap();
            let mut bytes = Vec::new();
            body.read_to_end(&mut bytes).await.unwrap();
            assert!(bytes == SMALL || bytes == LARGE);
            assert_eq!(meta.size, bytes.len() as u64);
            assert_eq!(meta.etag, format!("{:x}", md5::compute(&bytes)));

            let head = storage.head_object("b", "hot").await.unwrap();
            let expected = if head.size == SMALL.len() as u64 { SMALL } else { LARGE };
            assert_eq!(head.etag, format!("{:x}", md5::compute(expected)));
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn readiness_probe_leaves_nothing_behind() {
        let (_dir, storage) = storage_with_bucket("b").await;
        storage.check_ready().await.unwrap();

        let mut entries = fs::read_dir(storage.base_path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(names, vec!["b".to_string()]);
    }
}
