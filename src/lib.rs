//! Uniform object storage across cloud providers and the local filesystem.
//!
//! One [`Storage`] contract covers uploading, downloading, listing, deleting
//! and presigning objects on:
//!
//! - S3 and S3-compatible stores (feature `aws`)
//! - Azure Blob Storage (feature `azure`)
//! - Google Cloud Storage (feature `gcp`)
//! - Alibaba Cloud OSS (feature `alioss`)
//! - the local filesystem (always available)
//!
//! Large transfers are split into parts moved in parallel, and every
//! backend retries transient provider errors with exponential backoff.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use object_storage::{StorageConfig, new_storage};
//!
//! # async fn example() -> Result<(), object_storage::StorageError> {
//! let config = StorageConfig::from_yaml_str(
//!     r#"
//! s3:
//!   region: us-west-2
//!   bucket: recordings
//! "#,
//! )?;
//! let storage = new_storage(config).await?;
//!
//! let (location, size) = storage
//!     .upload_data(Bytes::from_static(b"hello"), "rooms/a.txt", "text/plain")
//!     .await?;
//! let url = storage
//!     .generate_presigned_url("rooms/a.txt", Duration::from_secs(3600))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Wrap any backend in [`MeteredStorage`] to record per-operation latency
//! and errors with OpenTelemetry.

mod backends;
mod config;
mod dispatcher;
mod error;
mod metered;
mod metrics;
mod presign;
mod proxy;
mod retry;
mod traits;

#[cfg(feature = "alioss")]
pub use backends::alioss::AliOssStorage;
#[cfg(feature = "azure")]
pub use backends::azure::AzureStorage;
#[cfg(feature = "gcp")]
pub use backends::gcs::GcsStorage;
pub use backends::local::LocalStorage;
#[cfg(feature = "aws")]
pub use backends::s3::S3Storage;
pub use config::{
    AZURE_STORAGE_ACCOUNT_ENV,
    AZURE_STORAGE_KEY_ENV,
    AliOssConfig,
    AzureConfig,
    GOOGLE_APPLICATION_CREDENTIALS_ENV,
    GcpConfig,
    LocalConfig,
    ProxyConfig,
    S3Config,
    StaticTokenCredential,
    StorageConfig,
    TokenCredential,
};
pub use dispatcher::new_storage;
pub use error::{StorageError, StorageResult};
pub use metered::MeteredStorage;
pub use metrics::{StorageMetrics, Timer};
pub use presign::{MAX_PRESIGN_EXPIRY, validate_expiry};
pub use retry::{RetryPolicy, retry_async};
pub use traits::Storage;
