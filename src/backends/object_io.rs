//! Chunked transfers over an [`ObjectStore`], shared by the Azure and GCS
//! backends.

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use object_store::{
    Attribute,
    AttributeValue,
    Attributes,
    ObjectMeta,
    ObjectStore,
    ObjectStoreExt,
    PutMultipartOptions,
    PutOptions,
    WriteMultipart,
    path::Path as ObjectPath,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

use crate::{RetryPolicy, StorageError, StorageResult, retry_async};

/// Chunk size and number of chunks in flight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunking {
    pub chunk_size: usize,
    pub parallelism: usize,
}

/// Object path for a storage key, kept verbatim.
///
/// `ObjectPath::from` would percent-encode characters such as `~` and `#`
/// into the stored name, so keys are parsed instead. Keys with empty or
/// relative segments are rejected.
fn object_path(key: &str) -> StorageResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| StorageError::Other {
        source: anyhow::anyhow!("invalid storage path '{}': {}", key, e),
    })
}

async fn abort(writer: WriteMultipart, key: &str) {
    if let Err(e) = writer.abort().await {
        warn!(key, error = %e, "Failed to abort multipart upload");
    }
}

fn attributes(content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    if !content_type.is_empty() {
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
    }
    attributes
}

/// Uploads `size` bytes from `reader`. Objects up to one chunk go up in a
/// single request, larger ones as a multipart upload that is aborted on
/// failure.
pub(crate) async fn upload<R>(
    store: &dyn ObjectStore,
    mut reader: R,
    size: u64,
    key: &str,
    content_type: &str,
    chunking: Chunking,
) -> StorageResult<()>
where
    R: AsyncRead + Unpin + Send,
{
    let path = object_path(key)?;

    if size <= chunking.chunk_size as u64 {
        let mut body = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut body).await?;
        let options = PutOptions {
            attributes: attributes(content_type),
            ..Default::default()
        };
        store.put_opts(&path, body.into(), options).await?;
        return Ok(());
    }

    info!(
        key,
        size,
        chunk_size = chunking.chunk_size,
        parallelism = chunking.parallelism,
        "Starting multipart upload"
    );

    let options = PutMultipartOptions {
        attributes: attributes(content_type),
        ..Default::default()
    };
    let upload = store.put_multipart_opts(&path, options).await?;
    let mut writer = WriteMultipart::new_with_chunk_size(upload, chunking.chunk_size);

    let mut buffer = vec![0u8; chunking.chunk_size];
    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                abort(writer, key).await;
                return Err(e.into());
            }
        };
        if let Err(e) = writer.wait_for_capacity(chunking.parallelism).await {
            abort(writer, key).await;
            return Err(e.into());
        }
        writer.write(&buffer[..n]);
    }
    writer.finish().await?;
    Ok(())
}

/// Object size and a stream of its chunks in order.
///
/// With `chunk_retry` set, every ranged read is retried on its own on top
/// of the store's request retries.
pub(crate) async fn download<'a>(
    store: &'a dyn ObjectStore,
    key: &str,
    chunking: Chunking,
    chunk_retry: Option<RetryPolicy>,
) -> StorageResult<(u64, impl Stream<Item = StorageResult<Bytes>> + Send + 'a)> {
    let path = object_path(key)?;
    let size = store.head(&path).await?.size;
    let chunk = chunking.chunk_size as u64;

    let chunks = stream::iter(0..size.div_ceil(chunk))
        .map(move |index| {
            let path = path.clone();
            async move {
                let range = index * chunk..((index + 1) * chunk).min(size);
                let path = &path;
                let read = || {
                    let range = range.clone();
                    async move { store.get_range(path, range).await.map_err(StorageError::from) }
                };
                match chunk_retry {
                    Some(policy) => retry_async(&policy, "get_range", read).await,
                    None => read().await,
                }
            }
        })
        .buffered(chunking.parallelism);
    Ok((size, chunks))
}

/// Keys starting with `prefix`, compared as raw strings.
pub(crate) async fn list(store: &dyn ObjectStore, prefix: &str) -> StorageResult<Vec<String>> {
    // object_store prefixes match whole path segments, so list from the
    // enclosing directory and filter.
    let prefix = prefix.trim_start_matches('/');
    let parent = match prefix.rsplit_once('/') {
        Some((dir, _)) => match ObjectPath::parse(dir) {
            Ok(dir) => Some(dir),
            // No stored key can sit under an unparseable directory.
            Err(_) => return Ok(Vec::new()),
        },
        None => None,
    };
    let objects: Vec<ObjectMeta> = store.list(parent.as_ref()).try_collect().await?;

    Ok(objects
        .into_iter()
        .map(|meta| String::from(meta.location))
        .filter(|key| key.starts_with(prefix))
        .collect())
}

pub(crate) async fn delete(store: &dyn ObjectStore, key: &str) -> StorageResult<()> {
    store.delete(&object_path(key)?).await?;
    Ok(())
}
