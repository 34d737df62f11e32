//! S3 and S3-compatible storage backend using aws-sdk-s3.

use std::{collections::HashMap, path::Path, time::Duration};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig, sts::AssumeRoleProvider};
use aws_sdk_s3::{
    Client as S3Client,
    config::{
        Credentials,
        Region,
        RequestChecksumCalculation,
        SharedCredentialsProvider,
        SharedHttpClient,
    },
    error::SdkError,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use aws_smithy_http_client::{Connector, tls};
use base64::{Engine, prelude::BASE64_STANDARD};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::transfer;
use crate::{ProxyConfig, S3Config, Storage, StorageError, StorageResult, presign};

/// Region used when none is configured.
const DEFAULT_REGION: &str = "us-east-1";

/// Host used for locations when no endpoint is configured.
const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";

const DEFAULT_CONTENT_DISPOSITION: &str = "inline";

const ASSUME_ROLE_SESSION_NAME: &str = "object-storage";

/// Part size for multipart uploads (8 MB). Payloads up to one part go
/// through a single PutObject.
const PART_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum number of parts uploaded at once.
const UPLOAD_CONCURRENCY: usize = 16;

/// Part size for concurrent ranged downloads (8 MB).
const DOWNLOAD_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum number of concurrent GetObject range requests.
const DOWNLOAD_CONCURRENCY: usize = 16;

/// S3 storage backend.
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    /// Region after optional bucket location discovery.
    region: String,
    endpoint: String,
    force_path_style: bool,
    metadata: HashMap<String, String>,
    tagging: Option<String>,
    content_disposition: String,
    /// Send Content-MD5 instead of the SDK's flexible checksums.
    content_md5: bool,
}

/// Bytes to upload, either in memory or in a local file.
enum Payload<'a> {
    Memory(Bytes),
    File(&'a Path),
}

impl Payload<'_> {
    async fn read(&self, offset: u64, len: u64) -> StorageResult<Bytes> {
        match self {
            Payload::Memory(data) => Ok(data.slice(offset as usize..(offset + len) as usize)),
            Payload::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buffer = vec![0u8; len as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }
}

impl S3Storage {
    /// Create a new S3 storage.
    ///
    /// Resolves credentials (static keys, else the default chain), assumes
    /// the configured role and discovers the bucket region when neither
    /// region nor endpoint is set.
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config("s3 bucket is required"));
        }

        let http_client = config
            .proxy_config
            .as_ref()
            .map(proxied_http_client)
            .transpose()?;

        let static_credentials = if !config.access_key.is_empty() && !config.secret.is_empty() {
            let session_token = if config.session_token.is_empty() {
                None
            } else {
                Some(config.session_token.clone())
            };
            Some(SharedCredentialsProvider::new(Credentials::new(
                &config.access_key,
                &config.secret,
                session_token,
                None,
                "object_storage",
            )))
        } else {
            None
        };

        let mut sdk_config = load_sdk_config(config, static_credentials, http_client.clone()).await;

        if !config.assume_role_arn.is_empty() {
            let mut builder = AssumeRoleProvider::builder(&config.assume_role_arn)
                .session_name(ASSUME_ROLE_SESSION_NAME)
                .configure(&sdk_config);
            if !config.assume_role_external_id.is_empty() {
                builder = builder.external_id(&config.assume_role_external_id);
            }
            let provider = builder.build().await;
            debug!(role_arn = %config.assume_role_arn, "Assuming role for S3 access");
            sdk_config = load_sdk_config(
                config,
                Some(SharedCredentialsProvider::new(provider)),
                http_client,
            )
            .await;
        }

        let content_md5 = is_oracle_endpoint(&config.endpoint);
        let mut region = if config.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            config.region.clone()
        };
        let mut client = build_client(&sdk_config, config, &region, content_md5);

        if config.region.is_empty() &&
            config.endpoint.is_empty() &&
            let Some(discovered) = discover_region(&client, &config.bucket).await?
        {
            region = discovered;
            client = build_client(&sdk_config, config, &region, content_md5);
        }

        debug!(
            bucket = %config.bucket,
            region = %region,
            endpoint = %config.endpoint,
            force_path_style = config.force_path_style,
            "Created S3 storage"
        );

        Ok(Self::from_client(client, config, region, content_md5))
    }

    /// Wraps an already configured client. Upload options come from
    /// `config`; credentials, endpoint and region are the client's.
    fn from_client(client: S3Client, config: &S3Config, region: String, content_md5: bool) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            region,
            endpoint: config.endpoint.clone(),
            force_path_style: config.force_path_style,
            metadata: config.metadata.clone(),
            tagging: (!config.tagging.is_empty()).then(|| config.tagging.clone()),
            content_disposition: if config.content_disposition.is_empty() {
                DEFAULT_CONTENT_DISPOSITION.to_string()
            } else {
                config.content_disposition.clone()
            },
            content_md5,
        }
    }

    /// Region requests are signed for.
    pub fn region(&self) -> &str {
        &self.region
    }

    fn location(&self, key: &str) -> String {
        object_location(&self.endpoint, &self.bucket, self.force_path_style, key)
    }

    fn metadata(&self) -> Option<HashMap<String, String>> {
        (!self.metadata.is_empty()).then(|| self.metadata.clone())
    }

    async fn upload(
        &self,
        payload: Payload<'_>,
        size: u64,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        if size <= PART_SIZE {
            let body = payload.read(0, size).await?;
            self.put_object(body, key, content_type).await?;
        } else {
            self.put_multipart(&payload, size, key, content_type).await?;
        }
        Ok(self.location(key))
    }

    async fn put_object(&self, body: Bytes, key: &str, content_type: &str) -> StorageResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(non_empty(content_type))
            .content_disposition(&self.content_disposition)
            .set_metadata(self.metadata())
            .set_tagging(self.tagging.clone());
        if self.content_md5 {
            request = request.content_md5(content_md5(&body));
        }

        request
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        payload: &Payload<'_>,
        size: u64,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(non_empty(content_type))
            .content_disposition(&self.content_disposition)
            .set_metadata(self.metadata())
            .set_tagging(self.tagging.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| {
                StorageError::provider(anyhow::anyhow!(
                    "No upload_id in create_multipart_upload response"
                ))
            })?
            .to_string();

        match self.put_parts(payload, size, key, &upload_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        bucket = %self.bucket,
                        key,
                        upload_id,
                        error = %abort_err,
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn put_parts(
        &self,
        payload: &Payload<'_>,
        size: u64,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let num_parts = size.div_ceil(PART_SIZE);

        info!(
            bucket = %self.bucket,
            key,
            size,
            num_parts,
            part_size = PART_SIZE,
            concurrency = UPLOAD_CONCURRENCY,
            "Starting S3 multipart upload"
        );

        let mut parts: Vec<CompletedPart> = stream::iter(0..num_parts)
            .map(|index| async move {
                let offset = index * PART_SIZE;
                let len = PART_SIZE.min(size - offset);
                let body = payload.read(offset, len).await?;
                let part_number = (index + 1) as i32;

                let mut request = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number);
                if self.content_md5 {
                    request = request.content_md5(content_md5(&body));
                }
                let resp = request
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;

                Ok::<_, StorageError>(
                    CompletedPart::builder()
                        .e_tag(resp.e_tag().unwrap_or_default())
                        .part_number(part_number)
                        .build(),
                )
            })
            .buffer_unordered(UPLOAD_CONCURRENCY)
            .try_collect()
            .await?;
        parts.sort_by_key(|part| part.part_number());

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        debug!(bucket = %self.bucket, key, upload_id, "Completed multipart upload");
        Ok(())
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end - 1))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(StorageError::provider)?;
        Ok(body.into_bytes())
    }

    /// Object size and a stream of its parts in order. Parts are fetched
    /// with up to [`DOWNLOAD_CONCURRENCY`] range requests in flight.
    async fn download_parts(
        &self,
        key: &str,
    ) -> StorageResult<(u64, impl futures::Stream<Item = StorageResult<Bytes>> + '_)> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let size = u64::try_from(head.content_length().unwrap_or(0)).unwrap_or(0);
        let num_parts = size.div_ceil(DOWNLOAD_PART_SIZE);

        if num_parts > 1 {
            info!(
                bucket = %self.bucket,
                key,
                size,
                num_parts,
                part_size = DOWNLOAD_PART_SIZE,
                concurrency = DOWNLOAD_CONCURRENCY,
                "Starting concurrent S3 download"
            );
        }

        let key = key.to_string();
        let parts = stream::iter(0..num_parts)
            .map(move |index| {
                let key = key.clone();
                async move {
                    let start = index * DOWNLOAD_PART_SIZE;
                    let end = (start + DOWNLOAD_PART_SIZE).min(size);
                    self.get_range(&key, start, end).await
                }
            })
            .buffered(DOWNLOAD_CONCURRENCY);
        Ok((size, parts))
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload_data(
        &self,
        data: Bytes,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let size = data.len() as u64;
        let location = self
            .upload(Payload::Memory(data), size, storage_path, content_type)
            .await?;
        Ok((location, size))
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        storage_path: &str,
        content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let size = tokio::fs::metadata(local_path).await?.len();
        let location = self
            .upload(Payload::File(local_path), size, storage_path, content_type)
            .await?;
        Ok((location, size))
    }

    async fn download_data(&self, storage_path: &str) -> StorageResult<Bytes> {
        let (size, parts) = self.download_parts(storage_path).await?;
        transfer::collect(size, parts).await
    }

    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64> {
        let (_, parts) = self.download_parts(storage_path).await?;
        transfer::write_to_file(local_path, parts).await
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(StorageError::provider)?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
        }
        Ok(keys)
    }

    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        expiration: Duration,
    ) -> StorageResult<String> {
        presign::check_expiry(expiration)?;

        let presigning_config =
            PresigningConfig::expires_in(expiration).map_err(|e| StorageError::Presign {
                reason: format!("Failed to create presigning config: {}", e),
            })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::Presign {
                reason: format!("Failed to generate presigned GET URL: {}", e),
            })?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, storage_path: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, storage_path))?;
        Ok(())
    }
}

async fn load_sdk_config(
    config: &S3Config,
    credentials: Option<SharedCredentialsProvider>,
    http_client: Option<SharedHttpClient>,
) -> SdkConfig {
    let region = if config.region.is_empty() {
        DEFAULT_REGION.to_string()
    } else {
        config.region.clone()
    };

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region))
        .retry_config(config.retry_policy().to_aws());
    if let Some(credentials) = credentials {
        loader = loader.credentials_provider(credentials);
    }
    if let Some(http_client) = http_client {
        loader = loader.http_client(http_client);
    }
    loader.load().await
}

fn build_client(sdk_config: &SdkConfig, config: &S3Config, region: &str, content_md5: bool) -> S3Client {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config)
        .region(Region::new(region.to_string()))
        .force_path_style(config.force_path_style);
    if !config.endpoint.is_empty() {
        builder = builder.endpoint_url(endpoint_url(&config.endpoint));
    }
    if content_md5 {
        builder = builder.request_checksum_calculation(RequestChecksumCalculation::WhenRequired);
    }
    S3Client::from_conf(builder.build())
}

/// Looks up the bucket's region. `None` when the provider reports no
/// location constraint, which means `us-east-1`.
async fn discover_region(client: &S3Client, bucket: &str) -> StorageResult<Option<String>> {
    let resp = client
        .get_bucket_location()
        .bucket(bucket)
        .send()
        .await
        .map_err(StorageError::provider)?;

    let region = resp
        .location_constraint()
        .map(|c| region_for_location(c.as_str()))
        .filter(|c| !c.is_empty());
    debug!(bucket, region = ?region, "Discovered S3 bucket region");
    Ok(region)
}

/// Region name for a bucket location constraint. Buckets created through
/// the legacy `EU` constraint live in `eu-west-1`.
fn region_for_location(constraint: &str) -> String {
    match constraint {
        "EU" => "eu-west-1".to_string(),
        other => other.to_string(),
    }
}

fn proxied_http_client(proxy: &ProxyConfig) -> StorageResult<SharedHttpClient> {
    let proxy = proxy.to_smithy()?;
    Ok(aws_smithy_http_client::Builder::new().build_with_connector_fn(
        move |settings, components| {
            let mut builder = Connector::builder().proxy_config(proxy.clone());
            builder.set_connector_settings(settings.cloned());
            if let Some(components) = components {
                builder.set_sleep_impl(components.sleep_impl());
            }
            builder
                .tls_provider(tls::Provider::Rustls(tls::rustls_provider::CryptoMode::AwsLc))
                .build()
        },
    ))
}

fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if err.raw_response().map(|r| r.status().as_u16()) == Some(404) {
        StorageError::not_found(key)
    } else {
        StorageError::provider(err)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn content_md5(body: &[u8]) -> String {
    BASE64_STANDARD.encode(md5::compute(body).0)
}

fn endpoint_url(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// Oracle Cloud rejects the SDK's flexible checksum headers.
fn is_oracle_endpoint(endpoint: &str) -> bool {
    if endpoint.is_empty() {
        return false;
    }
    url::Url::parse(&endpoint_url(endpoint))
        .ok()
        .and_then(|url| url.host_str().map(|h| h.ends_with("oraclecloud.com")))
        .unwrap_or(false)
}

fn object_location(endpoint: &str, bucket: &str, force_path_style: bool, key: &str) -> String {
    let endpoint = if endpoint.is_empty() {
        DEFAULT_ENDPOINT
    } else {
        endpoint.trim_end_matches('/')
    };

    if force_path_style {
        format!("{}/{}/{}", endpoint_url(endpoint), bucket, key)
    } else {
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .unwrap_or(endpoint);
        format!("https://{}.{}/{}", bucket, host, key)
    }
}
