//! The storage seam between the HTTP layer and a concrete backend.
//!
//! Handlers only ever see `Arc<dyn ObjectStorage>`; [`FileStorage`] is the
//! filesystem implementation used by the server.
//!
//! [`FileStorage`]: super::file_storage::FileStorage

use crate::models::object::ObjectMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{collections::HashMap, io, pin::Pin};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Incoming object content, consumed chunk by chunk.
pub type ContentStream = BoxStream<'static, io::Result<Bytes>>;

/// Outgoing object content. Dropping it releases the underlying handle.
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// Caller-supplied `x-amz-meta-*` headers forwarded with an upload.
pub type UserMetadata = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("path `{0}` escapes the storage root")]
    PathTraversalRejected(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Parameters for [`ObjectStorage::list_objects`].
#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    /// Only keys starting with this string are returned. Empty matches all.
    pub prefix: String,
    /// Keys lexicographically `<=` the marker are skipped. Empty skips nothing.
    pub marker: String,
    /// Enumeration stops once this many keys are collected.
    pub max_keys: usize,
}

/// S3-like bucket/object operations.
///
/// Implementations must be safe to call concurrently. Nothing is retried
/// internally; every failure is surfaced to the caller as a [`StorageError`].
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Names of all buckets, in backend enumeration order.
    async fn list_buckets(&self) -> StorageResult<Vec<String>>;

    /// Create a bucket. Succeeds if it already exists.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Delete a bucket and everything in it. Succeeds if it is already gone.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Keys under `bucket` matching `params`.
    async fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StorageResult<Vec<String>>;

    /// Store `content` at `key`, replacing any existing object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content: ContentStream,
        metadata: UserMetadata,
    ) -> StorageResult<ObjectMetadata>;

    /// Open an object for reading. The metadata describes the same revision
    /// the body will yield.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectMetadata, ObjectBody)>;

    /// Remove an object. Fails with `ObjectNotFound` if it does not exist.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Metadata for an object, with the ETag recomputed from its content.
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata>;

    /// Copy one object over another location, replacing the destination.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<ObjectMetadata>;

    /// Exercise the backend (write, read back, remove) for readiness probes.
    async fn check_ready(&self) -> StorageResult<()>;
}
