//! Azure Blob Storage backend using object_store for data I/O and
//! azure_storage_blobs for user delegation SAS presigning.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use azure_storage::{
    StorageCredentials,
    shared_access_signature::{
        SasProtocol,
        service_sas::{
            BlobSasPermissions,
            BlobSharedAccessSignature,
            BlobSignedResource,
            UserDeligationKey,
        },
    },
};
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use time::OffsetDateTime;
use tracing::debug;

use super::{
    object_io::{self, Chunking},
    transfer,
};
use crate::{
    AzureConfig,
    RetryPolicy,
    Storage,
    StorageError,
    StorageResult,
    TokenCredential,
    presign,
    retry_async,
};

/// 4 MB blocks, 16 in flight, for both directions.
const CHUNKING: Chunking = Chunking {
    chunk_size: 4 * 1024 * 1024,
    parallelism: 16,
};

/// Azure Blob Storage backend.
pub struct AzureStorage {
    store: Arc<MicrosoftAzure>,
    account: String,
    container: String,
    token_credential: Option<Arc<dyn TokenCredential>>,
}

impl AzureStorage {
    /// Create a new Azure storage authenticated with the account shared key.
    pub fn new(config: &AzureConfig) -> StorageResult<Self> {
        if config.account_name.is_empty() {
            return Err(StorageError::config("azure account_name is required"));
        }
        if config.account_key.is_empty() {
            return Err(StorageError::config("azure account_key is required"));
        }
        if config.container_name.is_empty() {
            return Err(StorageError::config("azure container_name is required"));
        }

        let store = MicrosoftAzureBuilder::new()
            .with_account(&config.account_name)
            .with_access_key(&config.account_key)
            .with_container_name(&config.container_name)
            .with_retry(RetryPolicy::AZURE.to_object_store())
            .build()
            .map_err(|e| StorageError::config(e.to_string()))?;

        debug!(
            account = %config.account_name,
            container = %config.container_name,
            "Created Azure storage"
        );

        Ok(Self {
            store: Arc::new(store),
            account: config.account_name.clone(),
            container: config.container_name.clone(),
            token_credential: config.token_credential.clone(),
        })
    }

    fn location(&self, storage_path: &str) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}/{}",
            self.account, self.container, storage_path
        )
    }
}

#[async_trait]
impl Storage for AzureStorage {
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
        let (size, blocks) = object_io::download(
            self.store.as_ref(),
            storage_path,
            CHUNKING,
            Some(RetryPolicy::AZURE_BLOCK),
        )
        .await?;
        transfer::collect(size, blocks).await
    }

    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64> {
        let (_, blocks) = object_io::download(
            self.store.as_ref(),
            storage_path,
            CHUNKING,
            Some(RetryPolicy::AZURE_BLOCK),
        )
        .await?;
        transfer::write_to_file(local_path, blocks).await
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        object_io::list(self.store.as_ref(), prefix).await
    }

    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        expiration: Duration,
    ) -> StorageResult<String> {
        let Some(credential) = &self.token_credential else {
            return Err(StorageError::Unsupported {
                backend: "azure",
                operation: "generate_presigned_url",
                reason: "OAuth token credential required".to_string(),
            });
        };
        presign::check_expiry(expiration)?;

        let start = OffsetDateTime::now_utc();
        let expiry = start + expiration;

        let token = credential.token().await?;
        let service = BlobServiceClient::new(&self.account, StorageCredentials::bearer_token(token));
        let key = retry_async(&RetryPolicy::AZURE, "azure_get_user_delegation_key", || async {
            service
                .get_user_deligation_key(start, expiry)
                .await
                .map(|resp| resp.user_deligation_key)
                .map_err(StorageError::provider)
        })
        .await?;

        let blob = service
            .container_client(&self.container)
            .blob_client(storage_path);
        signed_read_url(&blob, &self.account, &self.container, storage_path, key, start, expiry)
    }

    async fn delete_object(&self, storage_path: &str) -> StorageResult<()> {
        object_io::delete(self.store.as_ref(), storage_path).await
    }
}

/// Read-only, HTTPS-only blob URL signed with a user delegation key.
fn signed_read_url(
    blob: &BlobClient,
    account: &str,
    container: &str,
    storage_path: &str,
    key: UserDeligationKey,
    start: OffsetDateTime,
    expiry: OffsetDateTime,
) -> StorageResult<String> {
    let sas = BlobSharedAccessSignature::new(
        key,
        format!("/blob/{}/{}/{}", account, container, storage_path),
        BlobSasPermissions {
            read: true,
            ..Default::default()
        },
        expiry,
        BlobSignedResource::Blob,
    )
    .start(start)
    .protocol(SasProtocol::Https);

    blob.generate_signed_blob_url(&sas)
        .map(|url| url.to_string())
        .map_err(|e| StorageError::Presign {
            reason: format!("Failed to sign blob URL: {}", e),
        })
}
