//! Local directory backend.
//!
//! Stores objects as files below a root directory, with keys mapped to
//! relative paths. Writes go through a temp file and a rename so readers
//! never see partial content, and `move_to` is a real rename.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

use bucketfs_common::{path, FileSystem, FsError, FsResult, ListingPage, Operation};

/// Suffix of in-flight files written by [`DirectoryFs::write_atomic`].
const TEMP_SUFFIX: &str = ".bucketfs-tmp";

pub struct DirectoryFs {
    base_path: PathBuf,
    sub_path: Option<String>,
    base_url: Option<String>,
    last_uri: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

impl DirectoryFs {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            sub_path: None,
            base_url: None,
            last_uri: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn resolve(&self, relative: &str) -> String {
        path::resolve(relative, self.sub_path.as_deref())
    }

    fn full_path(&self, key: &str) -> PathBuf {
        // Prevent path traversal
        let mut full = self.base_path.clone();
        for segment in key.split('/') {
            if !matches!(segment, "" | "." | "..") {
                full.push(segment);
            }
        }
        full
    }

    fn fail(&self, operation: Operation, err: impl std::fmt::Display) -> FsError {
        let message = err.to_string();
        warn!(operation = %operation, error = %message, "Directory operation failed");
        *self.last_error.lock() = Some(message.clone());
        FsError::new(operation, message)
    }

    fn set_uri(&self, key: &str) {
        *self.last_uri.lock() = Some(key.to_string());
    }

    async fn ensure_parent(dest: &Path) -> std::io::Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write to a temp file next to `dest`, fsync, then rename into place.
    async fn write_atomic(dest: &Path, data: &[u8]) -> std::io::Result<()> {
        Self::ensure_parent(dest).await?;
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dest.with_file_name(format!(
            ".{}.{}{}",
            file_name,
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, dest).await
    }

    /// Keys of every file and directory under the directory part of
    /// `prefix`, sorted. Directories carry a trailing `/`, like marker
    /// objects in a bucket.
    fn walk_keys(base: &Path, prefix: &str) -> std::io::Result<Vec<String>> {
        let mut start = base.to_path_buf();
        if let Some((dir, _)) = prefix.rsplit_once('/') {
            for segment in dir.split('/') {
                if !matches!(segment, "" | "." | "..") {
                    start.push(segment);
                }
            }
        }
        let mut keys = Vec::new();
        if !start.is_dir() {
            return Ok(keys);
        }
        for entry in WalkDir::new(&start).min_depth(1) {
            let entry = entry.map_err(std::io::Error::other)?;
            if entry.file_type().is_file()
                && entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX)
            {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(base) else {
                continue;
            };
            let mut key = relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/");
            if entry.file_type().is_dir() {
                key.push('/');
            }
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl FileSystem for DirectoryFs {
    async fn write(&self, path: &str, content: Bytes) -> FsResult<()> {
        let key = self.resolve(path);
        Self::write_atomic(&self.full_path(&key), &content)
            .await
            .map_err(|e| self.fail(Operation::Write, e))?;
        self.set_uri(&key);
        debug!(key = %key, "Directory write complete");
        Ok(())
    }

    async fn append(&self, path: &str, content: Bytes) -> FsResult<()> {
        let existing = self.full_path(path);
        let key = if tokio::fs::try_exists(&existing)
            .await
            .map_err(|e| self.fail(Operation::Append, e))?
        {
            path.to_string()
        } else {
            self.resolve(path)
        };
        let dest = self.full_path(&key);
        let result = async {
            Self::ensure_parent(&dest).await?;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&dest)
                .await?;
            file.write_all(&content).await?;
            file.sync_all().await
        }
        .await;
        result.map_err(|e| self.fail(Operation::Append, e))?;
        self.set_uri(&key);
        Ok(())
    }

    async fn copy(&self, source: &str, destination: &str) -> FsResult<()> {
        let key = self.resolve(destination);
        let dest = self.full_path(&key);
        let result = async {
            Self::ensure_parent(&dest).await?;
            tokio::fs::copy(self.full_path(source), &dest).await
        }
        .await;
        result.map_err(|e| self.fail(Operation::Copy, e))?;
        self.set_uri(&key);
        Ok(())
    }

    async fn move_to(&self, source: &str, destination: &str) -> FsResult<()> {
        let key = self.resolve(destination);
        let dest = self.full_path(&key);
        let result = async {
            Self::ensure_parent(&dest).await?;
            tokio::fs::rename(self.full_path(source), &dest).await
        }
        .await;
        result.map_err(|e| self.fail(Operation::Move, e))?;
        self.set_uri(&key);
        Ok(())
    }

    async fn upload(&self, local: &Path, to: &str) -> FsResult<()> {
        let key = self.resolve(to);
        let dest = self.full_path(&key);
        let result = async {
            let data = tokio::fs::read(local).await?;
            Self::write_atomic(&dest, &data).await
        }
        .await;
        result.map_err(|e| self.fail(Operation::Upload, e))?;
        self.set_uri(&key);
        Ok(())
    }

    async fn exists(&self, path: &str) -> FsResult<bool> {
        self.set_uri(path);
        tokio::fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| self.fail(Operation::Exists, e))
    }

    async fn read(&self, path: &str) -> FsResult<Bytes> {
        let data = tokio::fs::read(self.full_path(path))
            .await
            .map_err(|e| self.fail(Operation::Read, e))?;
        self.set_uri(path);
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> FsResult<()> {
        let full = self.full_path(path);
        let result = match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(&full).await,
            Ok(_) => tokio::fs::remove_file(&full).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(self.fail(Operation::Delete, e)),
        }
        self.set_uri(path);
        debug!(key = %path, "Directory delete complete");
        Ok(())
    }

    async fn mkdir(&self, path: &str) -> FsResult<()> {
        tokio::fs::create_dir_all(self.full_path(path))
            .await
            .map_err(|e| self.fail(Operation::MkDir, e))?;
        self.set_uri(path);
        Ok(())
    }

    async fn last_modified(&self, path: &str) -> FsResult<i64> {
        let modified = tokio::fs::metadata(self.full_path(path))
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| self.fail(Operation::LastModified, e))?;
        self.set_uri(path);
        Ok(DateTime::<Utc>::from(modified).timestamp())
    }

    async fn file_size(&self, path: &str) -> FsResult<u64> {
        let meta = tokio::fs::metadata(self.full_path(path))
            .await
            .map_err(|e| self.fail(Operation::FileSize, e))?;
        self.set_uri(path);
        Ok(meta.len())
    }

    async fn list_page(
        &self,
        prefix: &str,
        limit: usize,
        marker: Option<&str>,
    ) -> FsResult<ListingPage> {
        let prefix = prefix.trim_start_matches('/');
        let base = self.base_path.clone();
        let walk_prefix = prefix.to_string();
        let all = tokio::task::spawn_blocking(move || Self::walk_keys(&base, &walk_prefix))
            .await
            .map_err(|e| self.fail(Operation::List, e))?
            .map_err(|e| self.fail(Operation::List, e))?;

        let mut matching = all
            .into_iter()
            .filter(|k| k.starts_with(prefix) && k.as_str() != prefix)
            .filter(|k| marker.map_or(true, |m| k.as_str() > m));
        let keys: Vec<String> = matching.by_ref().take(limit).collect();
        let next_marker = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(last.clone()),
            _ => None,
        };
        Ok(ListingPage { keys, next_marker })
    }

    async fn presigned_url(&self, path: &str, _expires_in: Duration) -> FsResult<String> {
        Err(self.fail(
            Operation::Presign,
            format!("presigned URLs are not supported for local file {}", path),
        ))
    }

    fn last_uri(&self) -> Option<String> {
        self.last_uri.lock().clone()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.base_url.as_deref().map(|base| path::join_url(base, key))
    }
}
