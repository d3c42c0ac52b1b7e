//! HTTP handlers for object and bucket operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to the configured `ObjectStorage`.

use crate::{
    errors::AppError,
    models::object::{DEFAULT_CONTENT_TYPE, ObjectMetadata},
    services::storage::{ListObjectsParams, UserMetadata},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;

const DEFAULT_MAX_KEYS: usize = 1000;
const USER_METADATA_PREFIX: &str = "x-amz-meta-";
const COPY_SOURCE_BUCKET: &str = "x-amz-copy-source-bucket";
const COPY_SOURCE_KEY: &str = "x-amz-copy-source-key";

/// Query params accepted when listing a bucket.
#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub marker: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
}

impl ListObjectsQuery {
    /// `max-keys` defaults to 1000 when absent. Larger values are honored.
    fn into_params(self) -> ListObjectsParams {
        ListObjectsParams {
            prefix: self.prefix.unwrap_or_default(),
            marker: self.marker.unwrap_or_default(),
            max_keys: self.max_keys.unwrap_or(DEFAULT_MAX_KEYS),
        }
    }
}

#[derive(Serialize)]
pub struct BucketList {
    pub buckets: Vec<String>,
}

#[derive(Serialize)]
pub struct ObjectList {
    pub objects: Vec<String>,
}

#[derive(Serialize)]
pub struct ObjectUrl {
    pub url: String,
}

/// GET `/api/oss/buckets`
pub async fn list_buckets(State(state): State<AppState>) -> Result<Json<BucketList>, AppError> {
    let buckets = state.storage.list_buckets().await?;
    Ok(Json(BucketList { buckets }))
}

/// PUT `/api/oss/{bucket}`: create bucket (idempotent).
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state.storage.create_bucket(&bucket).await?;
    Ok(StatusCode::OK)
}

/// DELETE `/api/oss/{bucket}`: delete bucket and its contents.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/oss/{bucket}`: list keys, supports ?prefix=&marker=&max-keys=
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ObjectList>, AppError> {
    let objects = state.storage.list_objects(&bucket, &q.into_params()).await?;
    Ok(Json(ObjectList { objects }))
}

/// PUT `/api/oss/{bucket}/{*key}`
///
/// Uploads the raw request body, or copies an existing object when both
/// `x-amz-copy-source-bucket` and `x-amz-copy-source-key` are present.
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let copy_bucket = header_str(&headers, COPY_SOURCE_BUCKET);
    let copy_key = header_str(&headers, COPY_SOURCE_KEY);

    let object = match (copy_bucket, copy_key) {
        (Some(src_bucket), Some(src_key)) => {
            state
                .storage
                .copy_object(src_bucket, src_key, &bucket, &key)
                .await?
        }
        (None, None) => {
            let stream = body
                .into_data_stream()
                .map(|chunk| chunk.map_err(io::Error::other))
                .boxed();
            state
                .storage
                .put_object(&bucket, &key, stream, user_metadata(&headers))
                .await?
        }
        _ => return Err(AppError::bad_request("Missing source bucket or key")),
    };

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&quoted_etag(&object)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// GET `/oss/{bucket}/{*key}`: anonymous streaming download.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, body) = state.storage.get_object(&bucket, &key).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(body)));
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/api/oss/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.storage.head_object(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/api/oss/{bucket}/{*key}`
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/oss/{bucket}/{*key}`: public download link for an existing object.
pub async fn object_url(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state.storage.head_object(&bucket, &key).await?;
    let url = format!("{}/oss/{}/{}", state.public_url, bucket, key);
    Ok(Json(ObjectUrl { url }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Collect `x-amz-meta-*` headers. Values that are not visible ASCII are skipped.
fn user_metadata(headers: &HeaderMap) -> UserMetadata {
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with(USER_METADATA_PREFIX))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn quoted_etag(meta: &ObjectMetadata) -> String {
    format!("\"{}\"", meta.etag)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectMetadata) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));

    if let Ok(value) = HeaderValue::from_str(&quoted_etag(meta)) {
        headers.insert(header::ETAG, value);
    }

    let http_date = meta
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&http_date) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
