//! Round trip against every backend.
//!
//! The local backend always runs. Cloud backends run when their environment
//! variables are set and are skipped otherwise.

use std::{env, sync::Arc, time::Duration};

use bytes::Bytes;
use object_storage::{
    AliOssConfig,
    AzureConfig,
    GcpConfig,
    LocalConfig,
    S3Config,
    Storage,
    StorageConfig,
    new_storage,
};
use tempfile::TempDir;

/// All variables, or `None` if any is unset or empty.
fn vars<const N: usize>(names: [&str; N]) -> Option<[String; N]> {
    let mut values: [String; N] = std::array::from_fn(|_| String::new());
    for (value, name) in values.iter_mut().zip(names) {
        *value = env::var(name).ok().filter(|v| !v.is_empty())?;
    }
    Some(values)
}

async fn exercise(storage: Arc<dyn Storage>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let stamp = chrono::Utc::now().format("%m-%d-%H-%M-%S-%3f");
    let storage_path = format!("test-{}.txt", stamp);
    let data = Bytes::from_static(b"hello world");

    let (location, size) = storage
        .upload_data(data.clone(), &storage_path, "text/plain")
        .await
        .unwrap();
    assert_eq!(size, data.len() as u64);
    assert!(!location.is_empty());

    let items = storage
        .list_objects(&format!("test-{}", stamp))
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].ends_with(&storage_path));

    assert_eq!(storage.download_data(&storage_path).await.unwrap(), data);

    let dir = TempDir::new().unwrap();
    let local = dir.path().join("out/downloaded.txt");
    let written = storage.download_file(&local, &storage_path).await.unwrap();
    assert_eq!(written, data.len() as u64);
    assert_eq!(std::fs::read(&local).unwrap(), data);

    match storage
        .generate_presigned_url(&storage_path, Duration::from_secs(600))
        .await
    {
        Ok(url) => assert!(url::Url::parse(&url).is_ok(), "malformed url {}", url),
        Err(e) => assert!(e.is_unsupported(), "unexpected presign error: {}", e),
    }

    storage.delete_object(&storage_path).await.unwrap();
    assert!(
        storage
            .download_data(&storage_path)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_local() {
    let dir = TempDir::new().unwrap();
    let storage = new_storage(StorageConfig::Local(LocalConfig {
        storage_dir: dir.path().display().to_string(),
    }))
    .await
    .unwrap();

    exercise(storage).await;
}

#[tokio::test]
async fn test_local_large_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let storage = new_storage(StorageConfig::Local(LocalConfig {
        storage_dir: dir.path().join("store").display().to_string(),
    }))
    .await
    .unwrap();

    let source = dir.path().join("source.bin");
    let payload: Vec<u8> = (0..9 * 1024 * 1024).map(|i| (i % 253) as u8).collect();
    std::fs::write(&source, &payload).unwrap();

    let (_, size) = storage
        .upload_file(&source, "big/source.bin", "application/octet-stream")
        .await
        .unwrap();
    assert_eq!(size, payload.len() as u64);
    assert_eq!(storage.download_data("big/source.bin").await.unwrap(), payload);

    storage
        .delete_objects(&["big/source.bin".to_string()])
        .await
        .unwrap();
    assert!(storage.list_objects("big").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_s3() {
    let Some([access_key, secret, bucket]) = vars(["AWS_ACCESS_KEY", "AWS_SECRET", "S3_BUCKET"])
    else {
        eprintln!("skipping: missing env vars");
        return;
    };

    let storage = new_storage(StorageConfig::S3(S3Config {
        access_key,
        secret,
        session_token: env::var("AWS_SESSION_TOKEN").unwrap_or_default(),
        region: env::var("AWS_REGION").unwrap_or_default(),
        bucket,
        ..Default::default()
    }))
    .await
    .unwrap();

    exercise(storage).await;
}

#[tokio::test]
async fn test_s3_compatible_path_style() {
    let Some([access_key, secret, region, endpoint, bucket]) = vars([
        "OCI_ACCESS_KEY",
        "OCI_SECRET",
        "OCI_REGION",
        "OCI_ENDPOINT",
        "OCI_BUCKET",
    ]) else {
        eprintln!("skipping: missing env vars");
        return;
    };

    let storage = new_storage(StorageConfig::S3(S3Config {
        access_key,
        secret,
        region,
        endpoint,
        bucket,
        force_path_style: true,
        ..Default::default()
    }))
    .await
    .unwrap();

    exercise(storage).await;
}

#[tokio::test]
async fn test_azure() {
    let Some([account_name, account_key, container_name]) = vars([
        "AZURE_ACCOUNT_NAME",
        "AZURE_ACCOUNT_KEY",
        "AZURE_CONTAINER_NAME",
    ]) else {
        eprintln!("skipping: missing env vars");
        return;
    };

    let storage = new_storage(StorageConfig::Azure(AzureConfig {
        account_name,
        account_key,
        container_name,
        token_credential: None,
    }))
    .await
    .unwrap();

    exercise(storage).await;
}

#[tokio::test]
async fn test_gcp() {
    let Some([_, bucket]) = vars(["GOOGLE_APPLICATION_CREDENTIALS", "GCP_BUCKET"]) else {
        eprintln!("skipping: missing env vars");
        return;
    };

    let config = StorageConfig::Gcp(GcpConfig {
        bucket,
        ..Default::default()
    })
    .with_env_fallbacks()
    .unwrap();
    let storage = new_storage(config).await.unwrap();

    exercise(storage).await;
}

#[tokio::test]
async fn test_alioss() {
    let Some([access_key, secret, endpoint, bucket]) = vars([
        "ALI_ACCESS_KEY",
        "ALI_SECRET",
        "ALI_ENDPOINT",
        "ALI_BUCKET",
    ]) else {
        eprintln!("skipping: missing env vars");
        return;
    };

    let storage = new_storage(StorageConfig::AliOss(AliOssConfig {
        access_key,
        secret,
        endpoint,
        bucket,
    }))
    .await
    .unwrap();

    exercise(storage).await;
}
