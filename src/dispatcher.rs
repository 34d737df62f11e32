//! Builds the backend named by a [`StorageConfig`].

use std::sync::Arc;

use tracing::info;

#[cfg(feature = "alioss")]
use crate::backends::alioss::AliOssStorage;
#[cfg(feature = "azure")]
use crate::backends::azure::AzureStorage;
#[cfg(feature = "gcp")]
use crate::backends::gcs::GcsStorage;
#[cfg(feature = "aws")]
use crate::backends::s3::S3Storage;
use crate::{Storage, StorageConfig, StorageError, StorageResult, backends::local::LocalStorage};

/// Create the storage backend described by `config`.
///
/// Backends whose cargo feature is disabled fail with
/// [`StorageError::UnsupportedBackend`].
pub async fn new_storage(config: StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let backend = config.backend_name();

    let storage: Arc<dyn Storage> = match config {
        #[cfg(feature = "aws")]
        StorageConfig::S3(s3) => Arc::new(S3Storage::new(&s3).await?),
        #[cfg(feature = "azure")]
        StorageConfig::Azure(azure) => Arc::new(AzureStorage::new(&azure)?),
        #[cfg(feature = "gcp")]
        StorageConfig::Gcp(gcp) => Arc::new(GcsStorage::new(&gcp).await?),
        #[cfg(feature = "alioss")]
        StorageConfig::AliOss(oss) => Arc::new(AliOssStorage::new(&oss)?),
        StorageConfig::Local(local) => Arc::new(LocalStorage::new(&local)?),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(StorageError::UnsupportedBackend {
                backend: backend.to_string(),
            });
        }
    };

    info!(backend, "Initialized object storage");
    Ok(storage)
}
