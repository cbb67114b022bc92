//! Filesystem view over an object store.
//!
//! [`ObjectFs`] maps the [`FileSystem`] operations onto an
//! [`ObjectStorageClient`]. Directories exist only as shared key prefixes and
//! zero-length marker objects; the configured `sub_path` lets several logical
//! roots share one bucket.
//!
//! The client is built from configuration on first use and kept for the
//! adapter's lifetime. Concurrent first uses build it once.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use bucketfs_common::config::keys;
use bucketfs_common::{path, ConfigProvider, FileSystem, FsError, FsResult, ListingPage, Operation};

use crate::backend::s3::S3Client;
use crate::client::{ObjectStorageClient, StorageError};
use crate::settings::ClientSettings;

/// Builds the backend client from validated settings.
pub type Connector =
    Box<dyn Fn(&ClientSettings) -> Result<Arc<dyn ObjectStorageClient>, StorageError> + Send + Sync>;

pub struct ObjectFs {
    config: Arc<dyn ConfigProvider>,
    connector: Connector,
    client: OnceCell<Arc<dyn ObjectStorageClient>>,
    last_uri: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

impl fmt::Debug for ObjectFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFs")
            .field("initialized", &self.is_initialized())
            .field("last_uri", &*self.last_uri.lock())
            .finish()
    }
}

impl ObjectFs {
    /// Adapter backed by the S3 HTTP client.
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self::with_connector(config, |settings: &ClientSettings| {
            Ok(Arc::new(S3Client::new(settings.clone())?) as Arc<dyn ObjectStorageClient>)
        })
    }

    /// Adapter whose client comes from `connector`, called at most once.
    pub fn with_connector<F>(config: Arc<dyn ConfigProvider>, connector: F) -> Self
    where
        F: Fn(&ClientSettings) -> Result<Arc<dyn ObjectStorageClient>, StorageError> + Send + Sync + 'static,
    {
        Self {
            config,
            connector: Box::new(connector),
            client: OnceCell::new(),
            last_uri: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    /// The backend client, built on the first call.
    ///
    /// A failed construction is not cached; the next call tries again.
    pub async fn client(&self) -> FsResult<Arc<dyn ObjectStorageClient>> {
        self.client
            .get_or_try_init(|| async {
                let settings = ClientSettings::from_config(self.config.as_ref())?;
                let client = (self.connector)(&settings)?;
                info!(
                    bucket = %settings.bucket,
                    endpoint = %settings.endpoint,
                    "Object storage client initialized"
                );
                Ok::<_, StorageError>(client)
            })
            .await
            .cloned()
            .map_err(|e| self.fail(Operation::ClientInit, e))
    }

    /// Object key for a path relative to the configured sub-path.
    pub fn resolve(&self, relative: &str) -> String {
        path::resolve(relative, self.config.get_non_empty(keys::SUB_PATH))
    }

    fn fail(&self, operation: Operation, err: impl fmt::Display) -> FsError {
        let message = err.to_string();
        warn!(operation = %operation, error = %message, "Object storage operation failed");
        *self.last_error.lock() = Some(message.clone());
        FsError::new(operation, message)
    }

    fn set_uri(&self, key: &str) {
        *self.last_uri.lock() = Some(key.to_string());
    }
}

#[async_trait]
impl FileSystem for ObjectFs {
    async fn write(&self, path: &str, content: Bytes) -> FsResult<()> {
        let key = self.resolve(path);
        let client = self.client().await?;
        client
            .append_object(&key, content, 0)
            .await
            .map_err(|e| self.fail(Operation::Write, e))?;
        self.set_uri(&key);
        debug!(key = %key, "write complete");
        Ok(())
    }

    async fn append(&self, path: &str, content: Bytes) -> FsResult<()> {
        let client = self.client().await?;
        let existing = client
            .object_exists(path)
            .await
            .map_err(|e| self.fail(Operation::Append, e))?;
        let (key, position) = if existing {
            let meta = client
                .head_object(path)
                .await
                .map_err(|e| self.fail(Operation::Append, e))?;
            (path.to_string(), meta.content_length)
        } else {
            (self.resolve(path), 0)
        };
        client
            .append_object(&key, content, position)
            .await
            .map_err(|e| self.fail(Operation::Append, e))?;
        self.set_uri(&key);
        debug!(key = %key, position, "append complete");
        Ok(())
    }

    async fn copy(&self, source: &str, destination: &str) -> FsResult<()> {
        let key = self.resolve(destination);
        let client = self.client().await?;
        client
            .copy_object(source, &key)
            .await
            .map_err(|e| self.fail(Operation::Copy, e))?;
        self.set_uri(&key);
        debug!(source = %source, key = %key, "copy complete");
        Ok(())
    }

    async fn move_to(&self, source: &str, destination: &str) -> FsResult<()> {
        let key = self.resolve(destination);
        let client = self.client().await?;
        if source == key {
            // Copying onto itself then deleting would drop the only copy.
            client
                .head_object(source)
                .await
                .map_err(|e| self.fail(Operation::Move, e))?;
            self.set_uri(&key);
            debug!(key = %key, "move onto the same key, nothing to do");
            return Ok(());
        }
        client
            .copy_object(source, &key)
            .await
            .map_err(|e| self.fail(Operation::Move, e))?;
        // No rollback: if this fails both objects remain.
        if let Err(e) = client.delete_object(source).await {
            warn!(source = %source, key = %key, "move copied the object but could not remove the source");
            return Err(self.fail(Operation::Move, e));
        }
        self.set_uri(&key);
        debug!(source = %source, key = %key, "move complete");
        Ok(())
    }

    async fn upload(&self, local: &Path, to: &str) -> FsResult<()> {
        let key = self.resolve(to);
        let client = self.client().await?;
        client
            .put_file(&key, local)
            .await
            .map_err(|e| self.fail(Operation::Upload, e))?;
        self.set_uri(&key);
        debug!(key = %key, local = %local.display(), "upload complete");
        Ok(())
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        self.set_uri(path);
        let client = self.client().await?;
        client
            .object_exists(path)
            .await
            .map_err(|e| self.fail(Operation::Exists, e))
    }

    async fn read(&self, path: &str) -> FsResult<Bytes> {
        let client = self.client().await?;
        let data = client
            .get_object(path)
            .await
            .map_err(|e| self.fail(Operation::Read, e))?;
        self.set_uri(path);
        Ok(data)
    }

    async fn delete(&self, path: &str) -> FsResult<()> {
        let client = self.client().await?;
        client
            .delete_object(path)
            .await
            .map_err(|e| self.fail(Operation::Delete, e))?;
        self.set_uri(path);
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> FsResult<()> {
        let client = self.client().await?;
        client
            .put_object(path, Bytes::new())
            .await
            .map_err(|e| self.fail(Operation::MkDir, e))?;
        self.set_uri(path);
        Ok(())
    }

    async fn last_modified(&self, path: &str) -> FsResult<i64> {
        let client = self.client().await?;
        let meta = client
            .head_object(path)
            .await
            .map_err(|e| self.fail(Operation::LastModified, e))?;
        self.set_uri(path);
        Ok(meta.last_modified.timestamp())
    }

    async fn file_size(&self, path: &str) -> FsResult<u64> {
        let client = self.client().await?;
        let meta = client
            .head_object(path)
            .await
            .map_err(|e| self.fail(Operation::FileSize, e))?;
        self.set_uri(path);
        Ok(meta.content_length)
    }

    async fn list_page(
        &self,
        prefix: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> FsResult<ListingPage> {
        let client = self.client().await?;
        client
            .list_objects(prefix, limit, marker)
            .await
            .map_err(|e| self.fail(Operation::List, e))
    }

    async fn presigned_url(&self, path: &str, expires_in: Duration) -> FsResult<String> {
        let client = self.client().await?;
        let url = client
            .presign_get(path, expires_in)
            .map_err(|e| self.fail(Operation::Presign, e))?;
        self.set_uri(path);
        Ok(url)
    }

    fn last_uri(&self) -> Option<String> {
        self.last_uri.lock().clone()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.config
            .get_non_empty(keys::BASE_URL)
            .map(|base| path::join_url(base, key))
    }
}
