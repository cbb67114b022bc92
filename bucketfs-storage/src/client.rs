//! Contract between the filesystem adapter and an object storage backend.
//!
//! A client is bound to one bucket at construction; every key passed to it
//! addresses an object inside that bucket.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use bucketfs_common::ListingPage;

/// Longest validity window a SigV4 presigned URL may carry (seven days).
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Content type recorded for zero-length directory marker objects.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{code} (HTTP {status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl StorageError {
    /// Transport failures and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StorageError::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn position_mismatch(key: &str, expected: u64, actual: u64) -> Self {
        StorageError::Service {
            status: 409,
            code: "PositionNotEqualToLength".to_string(),
            message: format!(
                "append to {} at position {} but object length is {}",
                key, expected, actual
            ),
        }
    }
}

/// Size and modification time of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
}

/// Operations the filesystem adapter needs from an object store.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    fn bucket(&self) -> &str;

    /// Create or replace the object at `key`.
    async fn put_object(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

    /// Write `data` at byte offset `position` of the object at `key`.
    ///
    /// `position` must equal the object's current length (zero when the
    /// object does not exist yet); anything else is rejected by the backend.
    async fn append_object(&self, key: &str, data: Bytes, position: u64)
        -> Result<(), StorageError>;

    /// Stream the local file at `local` into the object at `key`.
    async fn put_file(&self, key: &str, local: &Path) -> Result<(), StorageError>;

    /// Server-side copy within the client's bucket.
    async fn copy_object(&self, source: &str, destination: &str) -> Result<(), StorageError>;

    /// Remove the object at `key`; a missing object is not an error.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Metadata of the object at `key`, [`StorageError::NotFound`] if absent.
    async fn head_object(&self, key: &str) -> Result<ObjectMeta, StorageError>;

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError>;

    /// One page of keys starting with `prefix`, in the backend's order.
    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: usize,
        marker: Option<&str>,
    ) -> Result<ListingPage, StorageError>;

    /// A GET URL for `key` valid for `expires_in` from now.
    fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;

    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.head_object(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Content type stored with a new object, guessed from its key.
pub fn content_type_for(key: &str) -> String {
    if key.ends_with('/') {
        return DIRECTORY_CONTENT_TYPE.to_string();
    }
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub(crate) fn check_presign_expiry(expires_in: Duration) -> Result<u64, StorageError> {
    let secs = expires_in.as_secs();
    if secs == 0 || expires_in > MAX_PRESIGN_EXPIRY {
        return Err(StorageError::InvalidArgument(format!(
            "presign expiry must be between 1 and {} seconds, got {}",
            MAX_PRESIGN_EXPIRY.as_secs(),
            secs
        )));
    }
    Ok(secs)
}
