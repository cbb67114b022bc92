use std::path::Path;
use std::time::Duration;

use bytes::Bytes;

use crate::error::FsResult;

/// Page size used by [`FileSystem::read_dir`].
pub const DEFAULT_LIST_LIMIT: usize = 200;

/// Validity window used when a caller has no preference for presigned URLs.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(120);

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub keys: Vec<String>,
    /// Marker to pass back to [`FileSystem::list_page`] for the next page,
    /// `None` once the listing is exhausted.
    pub next_marker: Option<String>,
}

/// Filesystem-style operations shared by every storage backend.
///
/// Paths documented as *relative* are resolved against the backend's
/// sub-path prefix before use; paths documented as *keys* are used as-is.
/// Every operation that touches a single object records that object's key,
/// readable afterwards through [`last_uri`](FileSystem::last_uri).
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// Write `content` to a new object at the relative `path`.
    async fn write(&self, path: &str, content: Bytes) -> FsResult<()>;

    /// Append to the existing object whose key is `path`, or start a new
    /// object at the resolved relative `path` when none exists.
    ///
    /// Reading the current length and writing at that offset are two
    /// separate backend calls; concurrent appenders to one object race.
    async fn append(&self, path: &str, content: Bytes) -> FsResult<()>;

    /// Copy the object at key `source` to the relative `destination`.
    async fn copy(&self, source: &str, destination: &str) -> FsResult<()>;

    /// Move the object at key `source` to the relative `destination`.
    async fn move_to(&self, source: &str, destination: &str) -> FsResult<()>;

    /// Store the local file at `local` under the relative path `to`.
    async fn upload(&self, local: &Path, to: &str) -> FsResult<()>;

    async fn exists(&self, path: &str) -> FsResult<bool>;

    async fn read(&self, path: &str) -> FsResult<Bytes>;

    /// Remove the object at `path`. Removing a missing object succeeds.
    async fn delete(&self, path: &str) -> FsResult<()>;

    async fn mkdir(&self, path: &str) -> FsResult<()>;

    /// Modification time of `path` as Unix epoch seconds.
    async fn last_modified(&self, path: &str) -> FsResult<i64>;

    /// Size of `path` in bytes.
    async fn file_size(&self, path: &str) -> FsResult<u64>;

    /// List up to `limit` keys starting with `prefix`, resuming after
    /// `marker` when given.
    async fn list_page(
        &self,
        prefix: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> FsResult<ListingPage>;

    /// Keys starting with `prefix`: the first [`DEFAULT_LIST_LIMIT`] only.
    ///
    /// This never follows the continuation marker. Use
    /// [`read_dir_all`](FileSystem::read_dir_all) or
    /// [`list_page`](FileSystem::list_page) to see past the first page.
    async fn read_dir(&self, prefix: &str) -> FsResult<Vec<String>> {
        Ok(self.list_page(prefix, DEFAULT_LIST_LIMIT, None).await?.keys)
    }

    /// Every key starting with `prefix`, following continuation markers.
    async fn read_dir_all(&self, prefix: &str) -> FsResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .list_page(prefix, DEFAULT_LIST_LIMIT, marker.as_deref())
                .await?;
            keys.extend(page.keys);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => return Ok(keys),
            }
        }
    }

    /// A URL granting time-limited read access to the object at `path`.
    async fn presigned_url(&self, path: &str, expires_in: Duration) -> FsResult<String>;

    /// Key of the object most recently touched through this instance.
    fn last_uri(&self) -> Option<String>;

    /// Backend message of the most recent failure on this instance.
    fn last_error(&self) -> Option<String>;

    /// Public link for `key` built from the configured base URL, if any.
    fn public_url(&self, key: &str) -> Option<String>;
}
