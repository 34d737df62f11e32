//! Alibaba Cloud OSS backend on the opendal `Oss` service.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{
    EntryMode,
    ErrorKind,
    Operator,
    Writer,
    layers::TracingLayer,
    services::Oss,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::transfer;
use crate::{AliOssConfig, RetryPolicy, Storage, StorageError, StorageResult, presign};

/// Part size for multipart uploads and ranged downloads (8 MB).
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Parts in flight per transfer.
const CONCURRENCY: usize = 16;

/// Alibaba Cloud OSS backend.
pub struct AliOssStorage {
    op: Operator,
    /// Endpoint host without scheme, e.g. `oss-cn-hangzhou.aliyuncs.com`.
    endpoint: String,
    bucket: String,
    part_size: usize,
}

impl AliOssStorage {
    pub fn new(config: &AliOssConfig) -> StorageResult<Self> {
        for (name, value) in [
            ("access_key", &config.access_key),
            ("secret", &config.secret),
            ("endpoint", &config.endpoint),
            ("bucket", &config.bucket),
        ] {
            if value.is_empty() {
                return Err(StorageError::config(format!("alioss {} is required", name)));
            }
        }

        let (scheme, endpoint) = match config.endpoint.split_once("://") {
            Some((scheme @ ("http" | "https"), host)) => (scheme, host),
            Some((scheme, _)) => {
                return Err(StorageError::config(format!(
                    "unsupported alioss endpoint scheme '{}'",
                    scheme
                )));
            }
            None => ("https", config.endpoint.as_str()),
        };
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let builder = Oss::default()
            .bucket(&config.bucket)
            .endpoint(&format!("{}://{}", scheme, endpoint))
            .access_key_id(&config.access_key)
            .access_key_secret(&config.secret);
        let op = Operator::new(builder)
            .map_err(|e| StorageError::config(format!("invalid alioss config: {}", e)))?
            .layer(RetryPolicy::ALIOSS.to_opendal())
            .layer(TracingLayer)
            .finish();

        debug!(bucket = %config.bucket, endpoint = %endpoint, "Created AliOSS storage");

        Ok(Self::from_operator(op, endpoint, config.bucket.clone()))
    }

    fn from_operator(op: Operator, endpoint: String, bucket: String) -> Self {
        Self {
            op,
            endpoint,
            bucket,
            part_size: PART_SIZE,
        }
    }

    fn location(&self, storage_path: &str) -> String {
        format!("https://{}.{}/{}", self.bucket, self.endpoint, storage_path)
    }

    /// Streams `reader` into `key`, in `part_size` parts once it outgrows
    /// one part. The upload is aborted on failure.
    async fn write_stream<R>(&self, mut reader: R, key: &str, content_type: &str) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut writer = self
            .op
            .writer_with(key)
            .chunk(self.part_size)
            .concurrent(CONCURRENCY);
        if !content_type.is_empty() {
            writer = writer.content_type(content_type);
        }
        let mut writer = writer.await.map_err(|e| map_error(e, key, "upload_file"))?;

        let mut buffer = vec![0u8; self.part_size];
        let mut written = 0u64;
        loop {
            let n = match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    abort(&mut writer, key).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = writer.write(Bytes::copy_from_slice(&buffer[..n])).await {
                abort(&mut writer, key).await;
                return Err(map_error(e, key, "upload_file"));
            }
            written += n as u64;
        }
        writer
            .close()
            .await
            .map_err(|e| map_error(e, key, "upload_file"))?;
        Ok(written)
    }
}

async fn abort(writer: &mut Writer, key: &str) {
    if let Err(e) = writer.abort().await {
        warn!(key, error = %e, "Failed to abort multipart upload");
    }
}

/// Maps opendal errors. Temporary failures that survived the retry layer
/// stay retryable for callers.
fn map_error(err: opendal::Error, key: &str, operation: &'static str) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::not_found(key),
        ErrorKind::ConfigInvalid => StorageError::config(err.to_string()),
        ErrorKind::Unsupported => StorageError::Unsupported {
            backend: "alioss",
            operation,
            reason: err.to_string(),
        },
        _ if err.is_temporary() => StorageError::provider(err),
        _ => StorageError::Other { source: err.into() },
    }
}

#[async_trait]
impl Storage for AliOssStorage {
    async fn upload_data(
        &self,
        data: Bytes,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let size = data.len() as u64;
        let mut write = self.op.write_with(storage_path, data);
        if !content_type.is_empty() {
            write = write.content_type(content_type);
        }
        write
            .await
            .map_err(|e| map_error(e, storage_path, "upload_data"))?;
        Ok((self.location(storage_path), size))
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();
        if size > self.part_size as u64 {
            info!(
                bucket = %self.bucket,
                key = storage_path,
                size,
                part_size = self.part_size,
                concurrency = CONCURRENCY,
                "Starting OSS multipart upload"
            );
        }
        let written = self.write_stream(file, storage_path, content_type).await?;
        Ok((self.location(storage_path), written))
    }

    async fn download_data(&self, storage_path: &str) -> StorageResult<Bytes> {
        let buffer = self
            .op
            .read(storage_path)
            .await
            .map_err(|e| map_error(e, storage_path, "download_data"))?;
        Ok(buffer.to_bytes())
    }

    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64> {
        let size = self
            .op
            .stat(storage_path)
            .await
            .map_err(|e| map_error(e, storage_path, "download_file"))?
            .content_length();
        let reader = self
            .op
            .reader_with(storage_path)
            .chunk(self.part_size)
            .concurrent(CONCURRENCY)
            .await
            .map_err(|e| map_error(e, storage_path, "download_file"))?;
        let parts = reader
            .into_bytes_stream(0..size)
            .await
            .map_err(|e| map_error(e, storage_path, "download_file"))?;
        transfer::write_to_file(local_path, parts.map_err(StorageError::from)).await
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Listing runs from the enclosing directory so partial segments
        // still match.
        let prefix = prefix.trim_start_matches('/');
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => format!("{}/", dir),
            None => String::new(),
        };
        let entries = self
            .op
            .list_with(&dir)
            .recursive(true)
            .await
            .map_err(|e| map_error(e, prefix, "list_objects"))?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode() == EntryMode::FILE)
            .map(|entry| entry.path().to_string())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        expiration: Duration,
    ) -> StorageResult<String> {
        presign::check_expiry(expiration)?;

        let request = self
            .op
            .presign_read(storage_path, expiration)
            .await
            .map_err(|e| match map_error(e, storage_path, "generate_presigned_url") {
                err @ StorageError::Unsupported { .. } => err,
                err => StorageError::Presign {
                    reason: format!("Failed to presign OSS URL: {}", err),
                },
            })?;
        Ok(request.uri().to_string())
    }

    async fn delete_object(&self, storage_path: &str) -> StorageResult<()> {
        self.op
            .delete(storage_path)
            .await
            .map_err(|e| map_error(e, storage_path, "delete_object"))
    }
}
