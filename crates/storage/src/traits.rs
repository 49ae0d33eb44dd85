use async_trait::async_trait;
use chrono::{DateTime, Utc};
use d1_backup_types::DumpStream;
use std::collections::BTreeMap;

use crate::Result;

/// Field name the stores in this crate use for the upload instant.
pub const UPLOADED_FIELD: &str = "uploaded";

/// A metadata value as a bucket may report it.
///
/// Buckets written by different tools disagree on how they encode upload
/// times, so readers must be prepared for all three shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Timestamp(DateTime<Utc>),
    Text(String),
    EpochMillis(i64),
}

pub type ObjectMetadata = BTreeMap<String, MetadataValue>;

/// An object currently held by an archive store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveObject {
    pub key: String,
    pub size: u64,
    pub metadata: ObjectMetadata,
}

impl ArchiveObject {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            metadata: ObjectMetadata::new(),
        }
    }

    /// Object whose metadata carries a native `uploaded` timestamp.
    pub fn uploaded_at(key: impl Into<String>, size: u64, at: DateTime<Utc>) -> Self {
        Self::new(key, size).with_field(UPLOADED_FIELD, MetadataValue::Timestamp(at))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }
}

/// Object storage holding the archived dumps.
///
/// Objects are write-once: they are created by `put` and removed by
/// `delete`, never modified in place.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Upload `stream` under `key`, returning the number of bytes stored.
    /// Either the whole object becomes visible or nothing does.
    async fn put(&self, key: &str, stream: DumpStream) -> Result<u64>;

    /// All current objects, in no particular order.
    async fn list(&self) -> Result<Vec<ArchiveObject>>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}
