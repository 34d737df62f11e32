//! Sinks for downloads that arrive as an ordered stream of parts.

use std::path::Path;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use crate::StorageResult;

/// Concatenates `parts` into one buffer of `size` bytes.
pub(crate) async fn collect<S>(size: u64, parts: S) -> StorageResult<Bytes>
where
    S: Stream<Item = StorageResult<Bytes>>,
{
    let mut parts = std::pin::pin!(parts);
    let mut buffer = BytesMut::with_capacity(size as usize);
    while let Some(part) = parts.next().await {
        buffer.extend_from_slice(&part?);
    }
    Ok(buffer.freeze())
}

/// Writes `parts` to `local_path`, creating parent directories, and returns
/// the number of bytes written.
pub(crate) async fn write_to_file<S>(local_path: &Path, parts: S) -> StorageResult<u64>
where
    S: Stream<Item = StorageResult<Bytes>>,
{
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut parts = std::pin::pin!(parts);
    let mut file = tokio::fs::File::create(local_path).await?;
    let mut written = 0u64;
    while let Some(part) = parts.next().await {
        let part = part?;
        file.write_all(&part).await?;
        written += part.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use tempfile::TempDir;

    use super::*;
    use crate::StorageError;

    fn parts() -> Vec<StorageResult<Bytes>> {
        vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"wor")),
            Ok(Bytes::from_static(b"ld")),
        ]
    }

    #[tokio::test]
    async fn test_collect_preserves_order() {
        let data = collect(11, stream::iter(parts())).await.unwrap();
        assert_eq!(data, "hello world");
    }

    #[tokio::test]
    async fn test_write_to_file_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/out.bin");

        let written = write_to_file(&path, stream::iter(parts())).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_first_failed_part_aborts() {
        let parts = vec![
            Ok(Bytes::from_static(b"a")),
            Err(StorageError::not_found("k")),
            Ok(Bytes::from_static(b"b")),
        ];
        assert!(collect(2, stream::iter(parts)).await.unwrap_err().is_not_found());
    }
}
