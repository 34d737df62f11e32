//! Google Cloud Storage backend using object_store for data I/O and
//! google-cloud-storage for signed URLs.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::{
    client::{Client as GcsClient, ClientConfig, google_cloud_auth::credentials::CredentialsFile},
    sign::{SignedURLError, SignedURLMethod, SignedURLOptions},
};
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use tracing::{debug, warn};

use super::{
    object_io::{self, Chunking},
    transfer,
};
use crate::{GcpConfig, ProxyConfig, RetryPolicy, Storage, StorageError, StorageResult, presign};

/// 8 MB chunks, 16 in flight.
const CHUNKING: Chunking = Chunking {
    chunk_size: 8 * 1024 * 1024,
    parallelism: 16,
};

/// Google Cloud Storage backend.
pub struct GcsStorage {
    /// object_store client for data I/O.
    store: Arc<GoogleCloudStorage>,

    /// GCS client for signing. `None` when no credentials able to sign were
    /// found.
    signer: Option<GcsClient>,

    bucket: String,
}

impl GcsStorage {
    /// Create a new GCS storage.
    ///
    /// Uses the service account key from the config when set, otherwise
    /// application default credentials.
    pub async fn new(config: &GcpConfig) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config("gcp bucket is required"));
        }
        if !config.credentials_json.is_empty() {
            serde_json::from_str::<serde_json::Value>(&config.credentials_json).map_err(|e| {
                StorageError::config(format!("gcp credentials_json is not valid JSON: {}", e))
            })?;
        }

        let mut builder = if config.credentials_json.is_empty() {
            GoogleCloudStorageBuilder::from_env()
        } else {
            GoogleCloudStorageBuilder::new().with_service_account_key(&config.credentials_json)
        };
        builder = builder
            .with_bucket_name(&config.bucket)
            .with_retry(RetryPolicy::GCP.to_object_store());
        if let Some(proxy) = &config.proxy_config {
            builder = builder.with_proxy_url(proxy.url_with_credentials()?);
        }
        let store = builder
            .build()
            .map_err(|e| StorageError::config(e.to_string()))?;

        let signer = signing_client(config).await?;

        debug!(
            bucket = %config.bucket,
            proxied = config.proxy_config.is_some(),
            can_sign = signer.is_some(),
            "Created GCS storage"
        );

        Ok(Self {
            store: Arc::new(store),
            signer,
            bucket: config.bucket.clone(),
        })
    }

    fn location(&self, storage_path: &str) -> String {
        object_location(&self.bucket, storage_path)
    }
}

fn object_location(bucket: &str, storage_path: &str) -> String {
    format!("https://{}.storage.googleapis.com/{}", bucket, storage_path)
}

/// Builds the signing client. Explicit credentials must be usable; missing
/// ambient credentials only disable signing.
async fn signing_client(config: &GcpConfig) -> StorageResult<Option<GcsClient>> {
    let mut client_config = if config.credentials_json.is_empty() {
        match ClientConfig::default().with_auth().await {
            Ok(client_config) => client_config,
            Err(e) => {
                warn!(error = %e, "No GCP default credentials, signed URLs are unavailable");
                return Ok(None);
            }
        }
    } else {
        let credentials = CredentialsFile::new_from_str(&config.credentials_json)
            .await
            .map_err(|e| StorageError::config(format!("invalid gcp credentials: {}", e)))?;
        ClientConfig::default()
            .with_credentials(credentials)
            .await
            .map_err(|e| StorageError::config(format!("invalid gcp credentials: {}", e)))?
    };

    if let Some(proxy) = &config.proxy_config {
        client_config.http = Some(proxied_http_client(proxy)?);
    }
    Ok(Some(GcsClient::new(client_config)))
}

fn proxied_http_client(
    proxy: &ProxyConfig,
) -> StorageResult<reqwest_middleware::ClientWithMiddleware> {
    let client = reqwest::Client::builder()
        .proxy(proxy.to_reqwest()?)
        .build()
        .map_err(|e| StorageError::config(format!("failed to build proxied client: {}", e)))?;
    Ok(reqwest_middleware::ClientBuilder::new(client).build())
}

#[async_trait]
impl Storage for GcsStorage {
    async fn upload_data(
        &self,
        data: Bytes,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let size = data.len() as u64;
        object_io::upload(
            self.store.as_ref(),
            &data[..],
            size,
            storage_path,
            content_type,
            CHUNKING,
        )
        .await?;
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
        object_io::upload(
            self.store.as_ref(),
            file,
            size,
            storage_path,
            content_type,
            CHUNKING,
        )
        .await?;
        Ok((self.location(storage_path), size))
    }

    async fn download_data(&self, storage_path: &str) -> StorageResult<Bytes> {
        let (size, chunks) =
            object_io::download(self.store.as_ref(), storage_path, CHUNKING, None).await?;
        transfer::collect(size, chunks).await
    }

    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64> {
        let (_, chunks) =
            object_io::download(self.store.as_ref(), storage_path, CHUNKING, None).await?;
        transfer::write_to_file(local_path, chunks).await
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        object_io::list(self.store.as_ref(), prefix).await
    }

    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        expiration: Duration,
    ) -> StorageResult<String> {
        presign::check_expiry(expiration)?;

        let Some(signer) = &self.signer else {
            return Err(StorageError::Unsupported {
                backend: "gcp",
                operation: "generate_presigned_url",
                reason: "no credentials able to sign were found".to_string(),
            });
        };

        let opts = SignedURLOptions {
            method: SignedURLMethod::GET,
            expires: expiration,
            ..Default::default()
        };

        signer
            .signed_url(&self.bucket, storage_path, None, None, opts)
            .await
            .map_err(|e| match e {
                SignedURLError::InvalidOption(reason) => StorageError::Unsupported {
                    backend: "gcp",
                    operation: "generate_presigned_url",
                    reason: reason.to_string(),
                },
                e => StorageError::Presign {
                    reason: format!("Failed to generate presigned GET URL: {}", e),
                },
            })
    }

    async fn delete_object(&self, storage_path: &str) -> StorageResult<()> {
        object_io::delete(self.store.as_ref(), storage_path).await
    }
}
