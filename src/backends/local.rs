//! Local filesystem storage backend.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

use crate::{LocalConfig, Storage, StorageError, StorageResult};

/// Storage rooted at one absolute directory.
///
/// Storage paths are joined onto the root. Deleting an object also removes
/// the directories it leaves empty, so the tree looks like a flat namespace
/// with illusory directories. The root itself is never removed.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a local store. A relative `storage_dir` resolves against the
    /// current directory.
    pub fn new(config: &LocalConfig) -> StorageResult<Self> {
        let dir = if config.storage_dir.is_empty() {
            "."
        } else {
            config.storage_dir.as_str()
        };
        let root = std::path::absolute(dir)?;

        debug!(root = %root.display(), "Created local storage");

        Ok(Self { root })
    }

    /// Absolute storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, storage_path: &str) -> PathBuf {
        self.root.join(storage_path.trim_start_matches('/'))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    async fn create_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Files under `root/prefix`, matching the last prefix component both as
    /// a filename prefix and as a directory to recurse into.
    fn list_blocking(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let joined = self.resolve(prefix);
        let (dir, name_prefix) = if prefix.is_empty() || prefix.ends_with('/') {
            (joined, String::new())
        } else {
            let name = joined
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dir = joined.parent().map(Path::to_path_buf).unwrap_or(joined);
            (dir, name)
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // A prefix running through a regular file matches nothing.
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with(&name_prefix) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                for walked in WalkDir::new(&path).follow_links(true) {
                    let walked = walked.map_err(|e| StorageError::Io {
                        source: io::Error::other(e),
                    })?;
                    if walked.file_type().is_file() {
                        files.push(walked.into_path());
                    }
                }
            } else {
                files.push(path);
            }
        }

        let mut keys: Vec<String> = files.iter().filter_map(|p| self.key_for(p)).collect();
        keys.sort();
        Ok(keys)
    }
}

fn map_not_found(err: io::Error, storage_path: &str) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::not_found(storage_path)
    } else {
        StorageError::Io { source: err }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_data(
        &self,
        data: Bytes,
        storage_path: &str,
        _content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let path = self.resolve(storage_path);
        Self::create_parent(&path).await?;

        tokio::fs::write(&path, &data).await?;
        Ok((path.display().to_string(), data.len() as u64))
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        storage_path: &str,
        _content_type: &str,
    ) -> StorageResult<(String, u64)> {
        let mut source = tokio::fs::File::open(local_path).await?;
        let size = source.metadata().await?.len();

        let path = self.resolve(storage_path);
        Self::create_parent(&path).await?;
        let mut target = tokio::fs::File::create(&path).await?;
        tokio::io::copy(&mut source, &mut target).await?;

        Ok((path.display().to_string(), size))
    }

    async fn download_data(&self, storage_path: &str) -> StorageResult<Bytes> {
        let path = self.resolve(storage_path);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| map_not_found(e, storage_path))?;
        Ok(Bytes::from(data))
    }

    async fn download_file(&self, local_path: &Path, storage_path: &str) -> StorageResult<u64> {
        let path = self.resolve(storage_path);
        let mut source = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_not_found(e, storage_path))?;

        Self::create_parent(local_path).await?;
        let mut target = tokio::fs::File::create(local_path).await?;
        let written = tokio::io::copy(&mut source, &mut target).await?;
        Ok(written)
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let this = self.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || this.list_blocking(&prefix))
            .await
            .map_err(|e| StorageError::Other {
                source: anyhow::Error::from(e),
            })?
    }

    async fn generate_presigned_url(
        &self,
        storage_path: &str,
        _expiration: Duration,
    ) -> StorageResult<String> {
        // No signing material exists locally; the file URL is the reference.
        let path = self.resolve(storage_path);
        Url::from_file_path(&path)
            .map(|url| url.to_string())
            .map_err(|_| StorageError::Presign {
                reason: format!("cannot express {} as a file URL", path.display()),
            })
    }

    async fn delete_object(&self, storage_path: &str) -> StorageResult<()> {
        let path = self.resolve(storage_path);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_not_found(e, storage_path))?;

        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            let mut entries = tokio::fs::read_dir(&current).await?;
            if entries.next_entry().await?.is_some() {
                break;
            }
            tokio::fs::remove_dir(&current).await?;
            debug!(dir = %current.display(), "Removed empty directory");
            dir = current.parent().map(Path::to_path_buf);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store(dir: &TempDir) -> LocalStorage {
        LocalStorage::new(&LocalConfig {
            storage_dir: dir.path().display().to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_local_upload_and_download() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        for (name, data) in [
            ("empty.bin", Vec::new()),
            ("one.bin", vec![7u8]),
            ("big.bin", vec![3u8; 9 * 1024 * 1024]),
        ] {
            let (location, size) = store
                .upload_data(Bytes::from(data.clone()), name, "application/octet-stream")
                .await
                .unwrap();
            assert_eq!(size, data.len() as u64);
            assert_eq!(PathBuf::from(&location), temp_dir.path().join(name));

            let retrieved = store.download_data(name).await.unwrap();
            assert_eq!(retrieved, data);
        }
    }

    #[tokio::test]
    async fn test_local_upload_file_and_download_file() {
        let temp_dir = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let source = scratch.path().join("source.txt");
        tokio::fs::write(&source, b"hello world").await.unwrap();

        let (_, size) = store
            .upload_file(&source, "nested/dir/file.txt", "text/plain")
            .await
            .unwrap();
        assert_eq!(size, 11);

        let target = scratch.path().join("out/deeper/copy.txt");
        let written = store
            .download_file(&target, "nested/dir/file.txt")
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"hello world");

        // The stored object is untouched by the download.
        assert_eq!(
            store.download_data("nested/dir/file.txt").await.unwrap(),
            "hello world"
        );
    }

    #[tokio::test]
    async fn test_local_list_matches_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        for path in ["foo.txt", "foo/a.txt", "foo/sub/b.txt", "food", "bar.txt"] {
            store
                .upload_data(Bytes::from_static(b"x"), path, "text/plain")
                .await
                .unwrap();
        }

        let keys = store.list_objects("foo").await.unwrap();
        assert_eq!(keys, vec!["foo.txt", "foo/a.txt", "foo/sub/b.txt", "food"]);

        let keys = store.list_objects("foo/").await.unwrap();
        assert_eq!(keys, vec!["foo/a.txt", "foo/sub/b.txt"]);

        let keys = store.list_objects("").await.unwrap();
        assert_eq!(keys.len(), 5);

        assert!(store.list_objects("missing/dir/x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_list_through_a_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store
            .upload_data(Bytes::from_static(b"x"), "foo", "text/plain")
            .await
            .unwrap();

        assert!(store.list_objects("foo/bar").await.unwrap().is_empty());
        assert!(store.list_objects("foo/").await.unwrap().is_empty());
        assert_eq!(store.list_objects("fo").await.unwrap(), vec!["foo"]);
    }

    #[tokio::test]
    async fn test_local_delete_removes_empty_parents_but_not_root() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store
            .upload_data(Bytes::from_static(b"c"), "a/b/c.txt", "text/plain")
            .await
            .unwrap();
        store.delete_object("a/b/c.txt").await.unwrap();

        assert!(!temp_dir.path().join("a").exists());
        assert!(temp_dir.path().exists());
        assert!(store.download_data("a/b/c.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_delete_keeps_non_empty_parents() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store
            .upload_data(Bytes::from_static(b"1"), "a/keep.txt", "text/plain")
            .await
            .unwrap();
        store
            .upload_data(Bytes::from_static(b"2"), "a/b/c.txt", "text/plain")
            .await
            .unwrap();
        store.delete_object("a/b/c.txt").await.unwrap();

        assert!(!temp_dir.path().join("a/b").exists());
        assert!(temp_dir.path().join("a/keep.txt").exists());
    }

    #[tokio::test]
    async fn test_local_delete_objects_stops_at_first_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        for path in ["one.txt", "three.txt"] {
            store
                .upload_data(Bytes::from_static(b"x"), path, "text/plain")
                .await
                .unwrap();
        }

        let paths = vec![
            "one.txt".to_string(),
            "two.txt".to_string(),
            "three.txt".to_string(),
        ];
        let err = store.delete_objects(&paths).await.unwrap_err();
        assert!(err.is_not_found());

        assert!(!temp_dir.path().join("one.txt").exists());
        assert!(temp_dir.path().join("three.txt").exists());
    }

    #[tokio::test]
    async fn test_local_presigned_url_is_file_url() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let url = store
            .generate_presigned_url("dir/x.txt", Duration::from_secs(60))
            .await
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), "file");
        assert_eq!(
            parsed.to_file_path().unwrap(),
            temp_dir.path().join("dir/x.txt")
        );
    }

    #[tokio::test]
    async fn test_local_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let result = store.download_data("nonexistent/file.txt").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));

        let target = temp_dir.path().join("never.txt");
        let result = store.download_file(&target, "nonexistent/file.txt").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn test_relative_root_is_absolutized() {
        let store = LocalStorage::new(&LocalConfig {
            storage_dir: "relative/objects".to_string(),
        })
        .unwrap();
        assert!(store.root().is_absolute());
        assert!(store.root().ends_with("relative/objects"));
    }
}
