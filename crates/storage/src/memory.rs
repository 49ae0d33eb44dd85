use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use d1_backup_types::DumpStream;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::{
    validate_key, ArchiveObject, ArchiveStore, MetadataValue, ObjectMetadata, Result,
    StorageError, UPLOADED_FIELD,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    failing_deletes: HashSet<String>,
    fail_uploads: bool,
    puts: Vec<String>,
    delete_attempts: Vec<String>,
}

/// In-memory archive store.
///
/// Clones share the same bucket. Besides the [`ArchiveStore`] operations it
/// can seed objects with arbitrary metadata and inject failures, and it keeps
/// a log of `put` and `delete` calls.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchiveStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing `put`.
    pub fn insert(&self, object: ArchiveObject, data: impl Into<Bytes>) {
        self.state.write().objects.insert(
            object.key,
            StoredObject {
                data: data.into(),
                metadata: object.metadata,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.state.read().objects.get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.read().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.read().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }

    /// Make every `delete` of `key` fail.
    pub fn fail_deletes_for(&self, key: impl Into<String>) {
        self.state.write().failing_deletes.insert(key.into());
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state.write().fail_uploads = fail;
    }

    /// Keys passed to successful `put` calls, in call order.
    pub fn put_log(&self) -> Vec<String> {
        self.state.read().puts.clone()
    }

    /// Keys passed to `delete`, in call order, whether or not they succeeded.
    pub fn delete_log(&self) -> Vec<String> {
        self.state.read().delete_attempts.clone()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn put(&self, key: &str, stream: DumpStream) -> Result<u64> {
        validate_key(key)?;
        if self.contains(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        let mut buffer = BytesMut::new();
        let mut chunks = stream.into_inner();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| StorageError::UploadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            buffer.extend_from_slice(&chunk);
        }

        let mut state = self.state.write();
        if state.fail_uploads {
            return Err(StorageError::UploadFailed {
                key: key.to_string(),
                reason: "injected upload failure".to_string(),
            });
        }

        let size = buffer.len() as u64;
        let mut metadata = ObjectMetadata::new();
        metadata.insert(UPLOADED_FIELD.to_string(), MetadataValue::Timestamp(Utc::now()));
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data: buffer.freeze(),
                metadata,
            },
        );
        state.puts.push(key.to_string());
        Ok(size)
    }

    async fn list(&self) -> Result<Vec<ArchiveObject>> {
        let state = self.state.read();
        Ok(state
            .objects
            .iter()
            .map(|(key, object)| ArchiveObject {
                key: key.clone(),
                size: object.data.len() as u64,
                metadata: object.metadata.clone(),
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write();
        state.delete_attempts.push(key.to_string());

        if state.failing_deletes.contains(key) {
            return Err(StorageError::DeleteFailed {
                key: key.to_string(),
                reason: "injected delete failure".to_string(),
            });
        }

        state.objects.remove(key);
        Ok(())
    }
}
