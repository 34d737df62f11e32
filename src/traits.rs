//! Core storage trait.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::StorageResult;

/// Operations every backend supports.
///
/// Storage paths are provider-relative keys (root-relative paths for the
/// local backend). Callers should not pass paths containing `..`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upload an in-memory payload.
    ///
    /// Returns the fully qualified location of the object and its size,
    /// which always equals `data.len()`.
    async fn upload_data(
        &self,
        data: Bytes,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)>;

    /// Stream a local file into storage.
    ///
    /// The reported size is the file size when it was opened. If the file
    /// changes during the upload the size may differ from the bytes sent.
    async fn upload_file(
        &self,
        local_path: &Path,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)>;

    /// Read a whole object into memory.
    ///
    /// Returns `StorageError::NotFound` if the object doesn't exist.
    async fn download_data(&self, storage_path: &str) -> StorageResult<Bytes>;

    /// Stream an object into a local file, creating parent directories.
    ///
    /// Returns the number of bytes written.
    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64>;

    /// All keys starting with `prefix`, across every page.
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// A read-only URL usable without credentials for `expiration`.
    ///
    /// Fails with `StorageError::Unsupported` when the backend holds no
    /// credential able to sign.
    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        expiration: Duration,
    ) -> StorageResult<String>;

    /// Delete one object.
    async fn delete_object(&self, storage_path: &str) -> StorageResult<()>;

    /// Delete objects one after another.
    ///
    /// Stops at the first failure and returns it. Objects deleted before
    /// the failure stay deleted.
    async fn delete_objects(&self, storage_paths: &[String]) -> StorageResult<()> {
        for path in storage_paths {
            self.delete_object(path).await?;
        }
        Ok(())
    }
}
