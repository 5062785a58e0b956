//! Repository stored in a directory on this host.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use super::{StorageDriver, StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open the repository at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` below the root, refusing anything that could escape it.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if !Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = self.root.join(key);
        let root = self.root.canonicalize()?;

        // Symlinks inside the repository must not lead out of it.
        let mut existing = path.as_path();
        loop {
            match existing.canonicalize() {
                Ok(resolved) if resolved.starts_with(&root) => return Ok(path),
                Ok(_) => {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes repository: {key}"
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    match existing.parent() {
                        Some(parent) => existing = parent,
                        None => return Ok(path),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl StorageDriver for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), fields(driver = "local"))]
    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, data), fields(driver = "local", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).await?;

        let tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(parent)?;
        let (file, tmp_path) = tmp.into_parts();
        let mut file = fs::File::from_std(file);
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tmp_path
            .persist(&path)
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn local_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_then_fetch() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path().join("repo")).await.unwrap();

        storage
            .put("x86_64/hello-1.0-r0.apk", Bytes::from_static(b"pkg"))
            .await
            .unwrap();
        assert_eq!(
            storage.fetch("x86_64/hello-1.0-r0.apk").await.unwrap(),
            Bytes::from_static(b"pkg")
        );
        assert!(tmp.path().join("repo/x86_64/hello-1.0-r0.apk").is_file());
        assert_eq!(storage.local_root(), Some(tmp.path().join("repo").as_path()));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path()).await.unwrap();
        assert!(matches!(
            storage.fetch("x86/APKINDEX.tar.gz").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_keys_are_rejected() {
        let tmp = tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path().join("repo")).await.unwrap();
        for key in ["../escape", "/etc/passwd", "x86/../../escape", "", "./x"] {
            assert!(
                matches!(
                    storage.put(key, Bytes::new()).await,
                    Err(StorageError::InvalidKey(_))
                ),
                "{key}"
            );
        }
        assert!(!tmp.path().join("escape").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_repository_is_rejected() {
        let tmp = tempdir().unwrap();
        let outside = tmp.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        let storage = LocalStorage::new(tmp.path().join("repo")).await.unwrap();
        std::os::unix::fs::symlink(&outside, tmp.path().join("repo/x86")).unwrap();

        assert!(matches!(
            storage.put("x86/a.apk", Bytes::from_static(b"x")).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(!outside.join("a.apk").exists());
    }
}
