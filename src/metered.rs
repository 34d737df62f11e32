//! Storage decorator recording latency and errors per operation.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use opentelemetry::metrics::Meter;
use tracing::{Instrument, debug_span};

use crate::{Storage, StorageMetrics, StorageResult};

/// Wraps any [`Storage`] and records every call.
///
/// Latency goes to `object_storage_operation_duration_seconds`, failures to
/// `object_storage_errors_total` and payload sizes of successful transfers
/// to `object_storage_transferred_bytes_total`, all labelled with `backend`
/// and `op`. Each call also runs inside a `storage` tracing span.
pub struct MeteredStorage {
    inner: Arc<dyn Storage>,
    backend: &'static str,
    metrics: StorageMetrics,
}

impl MeteredStorage {
    pub fn new(inner: Arc<dyn Storage>, backend: &'static str, meter: &Meter) -> Self {
        Self {
            inner,
            backend,
            metrics: StorageMetrics::new(meter),
        }
    }

    async fn record<T, F>(&self, op: &'static str, path: &str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>> + Send,
    {
        let _timer = self.metrics.start(self.backend, op);
        let span = debug_span!("storage", backend = self.backend, op, path);

        let result = fut.instrument(span).await;
        if result.is_err() {
            self.metrics.record_error(self.backend, op);
        }
        result
    }

    /// Like `record`, also counting the bytes a successful call moved.
    async fn record_transfer<T, F>(
        &self,
        op: &'static str,
        path: &str,
        fut: F,
        size: impl FnOnce(&T) -> u64,
    ) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>> + Send,
    {
        let result = self.record(op, path, fut).await;
        if let Ok(value) = &result {
            self.metrics.record_bytes(self.backend, op, size(value));
        }
        result
    }
}

#[async_trait]
impl Storage for MeteredStorage {
    async fn upload_data(
        &self,
        data: Bytes,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        self.record_transfer(
            "upload_data",
            storage_path,
            self.inner.upload_data(data, storage_path, content_type),
            |(_, size)| *size,
        )
        .await
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        self.record_transfer(
            "upload_file",
            storage_path,
            self.inner.upload_file(local_path, storage_path, content_type),
            |(_, size)| *size,
        )
        .await
    }

    async fn download_data(&self, storage_path: &str) -> StorageResult<Bytes> {
        self.record_transfer(
            "download_data",
            storage_path,
            self.inner.download_data(storage_path),
            |data| data.len() as u64,
        )
        .await
    }

    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64> {
        self.record_transfer(
            "download_file",
            storage_path,
            self.inner.download_file(local_path, storage_path),
            |written| *written,
        )
        .await
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.record("list_objects", prefix, self.inner.list_objects(prefix))
            .await
    }

    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        expiration: Duration,
    ) -> StorageResult<String> {
        self.record(
            "generate_presigned_url",
            storage_path,
            self.inner.generate_presigned_url(storage_path, expiration),
        )
        .await
    }

    async fn delete_object(&self, storage_path: &str) -> StorageResult<()> {
        self.record(
            "delete_object",
            storage_path,
            self.inner.delete_object(storage_path),
        )
        .await
    }

    async fn delete_objects(&self, storage_paths: &[String]) -> StorageResult<()> {
        let count = storage_paths.len().to_string();
        self.record(
            "delete_objects",
            &count,
            self.inner.delete_objects(storage_paths),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{LocalConfig, LocalStorage};

    fn metered(dir: &TempDir) -> MeteredStorage {
        let local = LocalStorage::new(&LocalConfig {
            storage_dir: dir.path().display().to_string(),
        })
        .unwrap();
        let meter = opentelemetry::global::meter("object_storage_test");
        MeteredStorage::new(Arc::new(local), "local", &meter)
    }

    #[tokio::test]
    async fn test_metered_delegates_every_operation() {
        let dir = TempDir::new().unwrap();
        let storage = metered(&dir);

        let (location, size) = storage
            .upload_data(Bytes::from_static(b"hello"), "m/a.txt", "text/plain")
            .await
            .unwrap();
        assert_eq!(size, 5);
        assert!(location.ends_with("m/a.txt"));
        assert_eq!(storage.download_data("m/a.txt").await.unwrap(), "hello");
        assert_eq!(storage.list_objects("m").await.unwrap(), vec!["m/a.txt"]);

        storage
            .delete_objects(&["m/a.txt".to_string()])
            .await
            .unwrap();
        assert!(storage.download_data("m/a.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_metered_passes_errors_through() {
        let dir = TempDir::new().unwrap();
        let storage = metered(&dir);

        let err = storage.delete_object("missing.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
