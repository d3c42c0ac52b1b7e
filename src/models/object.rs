//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};

/// Fallback MIME type for keys without a recognised extension.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata describing the current revision of a single object.
///
/// Nothing here is persisted separately: every field is derived from the
/// file on disk (stat + content hash) at the time it is requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object key (slash-delimited path relative to the bucket).
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Filesystem modification time of the stored file.
    pub last_modified: DateTime<Utc>,

    /// MIME type derived from the key's extension.
    pub content_type: String,

    /// Lowercase hex MD5 of the object content.
    pub etag: String,
}

/// Derive a content type from the key's file extension.
///
/// Only the final path segment is inspected, case-insensitively.
pub fn content_type_for_key(key: &str) -> &'static str {
    let name = key.rsplit('/').next().unwrap_or(key);
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
