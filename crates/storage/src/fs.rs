use async_trait::async_trait;
use chrono::{DateTime, Utc};
use d1_backup_types::DumpStream;
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task;
use tracing::{debug, info};

use crate::{
    validate_key, ArchiveObject, ArchiveStore, MetadataValue, Result, StorageError,
    UPLOADED_FIELD,
};

/// Archive store backed by a local directory.
///
/// Uploads are streamed into a uniquely named hidden `.<key>.*.partial` file
/// and moved into place with a no-clobber rename once complete. The partial
/// file is removed when the upload fails or its future is dropped, so an
/// interrupted upload never shows up in `list` nor lingers in the bucket.
#[derive(Debug, Clone)]
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    /// Open (creating if needed) the bucket directory at `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        info!("Opened archive bucket at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh partial file for `key`. The returned [`TempPath`]
    /// deletes the file when dropped.
    async fn create_partial(&self, key: &str) -> io::Result<(fs::File, TempPath)> {
        let root = self.root.clone();
        let prefix = format!(".{}.", key);
        let partial = task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".partial")
                .tempfile_in(&root)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        let (file, path) = partial.into_parts();
        Ok((fs::File::from_std(file), path))
    }

    async fn write_partial(&self, file: &mut fs::File, stream: DumpStream) -> io::Result<u64> {
        let mut written = 0u64;
        let mut chunks = stream.into_inner();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ArchiveStore for FsArchiveStore {
    async fn put(&self, key: &str, stream: DumpStream) -> Result<u64> {
        validate_key(key)?;

        let target = self.root.join(key);
        if fs::try_exists(&target).await? {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        let upload_failed = |e: io::Error| StorageError::UploadFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let (mut file, partial) = self.create_partial(key).await.map_err(upload_failed)?;
        let written = self
            .write_partial(&mut file, stream)
            .await
            .map_err(upload_failed)?;
        drop(file);

        // On failure the error hands the path back, and dropping it removes the file.
        let persisted = task::spawn_blocking(move || {
            partial.persist_noclobber(&target).map_err(|e| e.error)
        })
        .await
        .map_err(|e| upload_failed(io::Error::new(io::ErrorKind::Other, e)))?;

        match persisted {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(key.to_string()));
            }
            Err(e) => {
                return Err(StorageError::UploadFailed {
                    key: key.to_string(),
                    reason: format!("rename failed: {}", e),
                });
            }
        }

        debug!(key, bytes = written, "Stored archive object");
        Ok(written)
    }

    async fn list(&self) -> Result<Vec<ArchiveObject>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::ListFailed(e.to_string()))?;
        let mut objects = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ListFailed(e.to_string()))?
        {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with('.') {
                continue;
            }

            let meta = entry
                .metadata()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;
            if !meta.is_file() {
                continue;
            }

            let mut object = ArchiveObject::new(name, meta.len());
            // Filesystems without mtime support yield an object with no timestamp.
            if let Ok(modified) = meta.modified() {
                let uploaded: DateTime<Utc> = modified.into();
                object = object.with_field(UPLOADED_FIELD, MetadataValue::Timestamp(uploaded));
            }
            objects.push(object);
        }

        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
