//! In-process object store.
//!
//! Keeps objects in a sorted map and follows the same rules as a real
//! backend: appends must land exactly at the current length, listings come
//! back in key order, deleting a missing key succeeds. Individual calls can
//! be made to fail to exercise partial-failure paths.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use bucketfs_common::ListingPage;

use crate::client::{check_presign_expiry, content_type_for, ObjectMeta, ObjectStorageClient, StorageError};

/// Calls that can be made to fail with [`MemoryClient::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    Put,
    Append,
    PutFile,
    Copy,
    Delete,
    Head,
    Get,
    List,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn new(key: &str, data: Bytes) -> Self {
        Self {
            data,
            content_type: content_type_for(key),
            last_modified: Utc::now(),
        }
    }
}

pub struct MemoryClient {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failures: Mutex<HashSet<MemoryOp>>,
}

impl MemoryClient {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Make every later `op` call fail with a 500 until [`clear_failures`].
    ///
    /// [`clear_failures`]: MemoryClient::clear_failures
    pub fn fail_on(&self, op: MemoryOp) {
        self.failures.lock().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().get(key).map(|o| o.content_type.clone())
    }

    fn check(&self, op: MemoryOp) -> Result<(), StorageError> {
        if self.failures.lock().contains(&op) {
            return Err(StorageError::Service {
                status: 500,
                code: "InternalError".to_string(),
                message: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorageClient for MemoryClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.check(MemoryOp::Put)?;
        self.objects
            .lock()
            .insert(key.to_string(), StoredObject::new(key, data));
        debug!(key = %key, "memory put complete");
        Ok(())
    }

    async fn append_object(&self, key: &str, data: Bytes, position: u64) -> Result<(), StorageError> {
        self.check(MemoryOp::Append)?;
        let mut objects = self.objects.lock();
        let current = objects.get(key).map(|o| o.data.len() as u64).unwrap_or(0);
        if current != position {
            return Err(StorageError::position_mismatch(key, position, current));
        }
        match objects.get_mut(key) {
            Some(existing) => {
                let mut combined = Vec::with_capacity(existing.data.len() + data.len());
                combined.extend_from_slice(&existing.data);
                combined.extend_from_slice(&data);
                existing.data = Bytes::from(combined);
                existing.last_modified = Utc::now();
            }
            None => {
                objects.insert(key.to_string(), StoredObject::new(key, data));
            }
        }
        debug!(key = %key, position, "memory append complete");
        Ok(())
    }

    async fn put_file(&self, key: &str, local: &Path) -> Result<(), StorageError> {
        self.check(MemoryOp::PutFile)?;
        let data = tokio::fs::read(local).await?;
        self.objects
            .lock()
            .insert(key.to_string(), StoredObject::new(key, Bytes::from(data)));
        Ok(())
    }

    async fn copy_object(&self, source: &str, destination: &str) -> Result<(), StorageError> {
        self.check(MemoryOp::Copy)?;
        let mut objects = self.objects.lock();
        let mut copied = objects
            .get(source)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
        copied.last_modified = Utc::now();
        objects.insert(destination.to_string(), copied);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.check(MemoryOp::Delete)?;
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        self.check(MemoryOp::Head)?;
        self.objects
            .lock()
            .get(key)
            .map(|o| ObjectMeta {
                content_length: o.data.len() as u64,
                last_modified: o.last_modified,
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        self.check(MemoryOp::Get)?;
        self.objects
            .lock()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: usize,
        marker: Option<&str>,
    ) -> Result<ListingPage, StorageError> {
        self.check(MemoryOp::List)?;
        let objects = self.objects.lock();
        let start = match marker {
            Some(m) => Bound::Excluded(m.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .map(|(k, _)| k)
            .skip_while(|k| !k.starts_with(prefix))
            .take_while(|k| k.starts_with(prefix));
        let keys: Vec<String> = matching.by_ref().take(max_keys).cloned().collect();
        let next_marker = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(last.clone()),
            _ => None,
        };
        Ok(ListingPage { keys, next_marker })
    }

    fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let secs = check_presign_expiry(expires_in)?;
        let expires_at = Utc::now().timestamp() + secs as i64;
        Ok(format!(
            "memory://{}/{}?Expires={}",
            self.bucket,
            crate::sign::encode_key(key),
            expires_at
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_requires_current_length() {
        let client = MemoryClient::new("media");
        client.append_object("log.txt", Bytes::from("ab"), 0).await.unwrap();
        client.append_object("log.txt", Bytes::from("cd"), 2).await.unwrap();
        assert_eq!(client.get_object("log.txt").await.unwrap(), Bytes::from("abcd"));

        let err = client.append_object("log.txt", Bytes::from("x"), 0).await.unwrap_err();
        assert!(matches!(err, StorageError::Service { status: 409, .. }));
        let err = client.append_object("new.txt", Bytes::from("x"), 3).await.unwrap_err();
        assert!(matches!(err, StorageError::Service { status: 409, .. }));
        assert!(!client.object_exists("new.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_pages_in_key_order() {
        let client = MemoryClient::new("media");
        for key in ["a/3", "a/1", "b/1", "a/2", "a0"] {
            client.put_object(key, Bytes::new()).await.unwrap();
        }
        let first = client.list_objects("a/", 2, None).await.unwrap();
        assert_eq!(first.keys, vec!["a/1", "a/2"]);
        assert_eq!(first.next_marker.as_deref(), Some("a/2"));

        let second = client.list_objects("a/", 2, first.next_marker.as_deref()).await.unwrap();
        assert_eq!(second.keys, vec!["a/3"]);
        assert_eq!(second.next_marker, None);

        let exact = client.list_objects("a/", 3, None).await.unwrap();
        assert_eq!(exact.keys.len(), 3);
        assert_eq!(exact.next_marker, None);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let client = MemoryClient::new("media");
        client.put_object("k", Bytes::from("v")).await.unwrap();
        client.fail_on(MemoryOp::Delete);
        assert!(client.delete_object("k").await.is_err());
        assert_eq!(client.len(), 1);
        client.clear_failures();
        client.delete_object("k").await.unwrap();
        assert!(client.is_empty());
    }

    #[test]
    fn test_presign_embeds_expiry() {
        let client = MemoryClient::new("media");
        let before = Utc::now().timestamp();
        let url = client.presign_get("data/a.txt", Duration::from_secs(120)).unwrap();
        let expires: i64 = url.rsplit("Expires=").next().unwrap().parse().unwrap();
        assert!(url.starts_with("memory://media/data/a.txt?"));
        assert!(expires >= before + 120 && expires <= Utc::now().timestamp() + 120);
    }
}
