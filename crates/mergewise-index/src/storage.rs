//! Durable homes for serialized snapshots, addressed by repository key.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use tokio::io::AsyncBufReadExt;

use crate::types::RepositoryKey;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const SNAPSHOT_FILE: &str = "snapshot.idx";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait SnapshotStorage: Send + Sync {
    /// Full serialized snapshot, or `None` when nothing is stored for `key`.
    fn read(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>>;

    /// First line of the stored snapshot, without reading the payload.
    fn read_header(
        &self,
        key: &RepositoryKey,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let read = self.read(key);
        Box::pin(async move {
            Ok(read.await?.map(|bytes| {
                let end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
                bytes[..end].to_vec()
            }))
        })
    }

    /// Replace the stored snapshot. Readers never observe a partial write.
    fn write(&self, key: &RepositoryKey, bytes: Vec<u8>)
    -> BoxFuture<'_, Result<(), StorageError>>;

    /// Delete the stored snapshot. Returns whether one existed.
    fn remove(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<bool, StorageError>>;

    fn exists(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<bool, StorageError>>;

    /// Every repository with a stored snapshot, sorted.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<RepositoryKey>, StorageError>>;
}

/// `<root>/<owner__name>/snapshot.idx` on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsSnapshotStorage {
    root: PathBuf,
}

impl FsSnapshotStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn snapshot_path(&self, key: &RepositoryKey) -> PathBuf {
        self.root.join(key.storage_name()).join(SNAPSHOT_FILE)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

impl SnapshotStorage for FsSnapshotStorage {
    fn read(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let path = self.snapshot_path(key);
        Box::pin(async move { read_optional(&path).await })
    }

    fn read_header(
        &self,
        key: &RepositoryKey,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let path = self.snapshot_path(key);
        Box::pin(async move {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(StorageError::io(&path, e)),
            };
            let mut line = Vec::new();
            tokio::io::BufReader::new(file)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            Ok(Some(line))
        })
    }

    fn write(
        &self,
        key: &RepositoryKey,
        bytes: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        let path = self.snapshot_path(key);
        Box::pin(async move {
            let dir = path
                .parent()
                .ok_or_else(|| StorageError::Other(format!("no parent for {}", path.display())))?;
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
            let tmp = path.with_extension("idx.tmp");
            tokio::fs::write(&tmp, &bytes)
                .await
                .map_err(|e| StorageError::io(&tmp, e))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            tracing::debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
            Ok(())
        })
    }

    fn remove(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<bool, StorageError>> {
        let dir = self.root.join(key.storage_name());
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StorageError::io(&dir, e)),
            }
        })
    }

    fn exists(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<bool, StorageError>> {
        let path = self.snapshot_path(key);
        Box::pin(async move {
            tokio::fs::try_exists(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<RepositoryKey>, StorageError>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.root).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(StorageError::io(&self.root, e)),
            };
            let mut keys = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(&self.root, e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                let Ok(key) = RepositoryKey::from_storage_name(&name) else {
                    continue;
                };
                if tokio::fs::try_exists(entry.path().join(SNAPSHOT_FILE))
                    .await
                    .unwrap_or(false)
                {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
    }
}

/// Process-local storage for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemorySnapshotStorage {
    entries: RwLock<BTreeMap<RepositoryKey, Vec<u8>>>,
}

impl MemorySnapshotStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite stored bytes directly, bypassing the codec.
    pub fn insert_raw(&self, key: &RepositoryKey, bytes: Vec<u8>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), bytes);
    }
}

impl SnapshotStorage for MemorySnapshotStorage {
    fn read(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<Option<Vec<u8>>, StorageError>> {
        let key = key.clone();
        Box::pin(async move {
            Ok(self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned())
        })
    }

    fn write(
        &self,
        key: &RepositoryKey,
        bytes: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), StorageError>> {
        self.insert_raw(key, bytes);
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<bool, StorageError>> {
        let key = key.clone();
        Box::pin(async move {
            Ok(self
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key)
                .is_some())
        })
    }

    fn exists(&self, key: &RepositoryKey) -> BoxFuture<'_, Result<bool, StorageError>> {
        let key = key.clone();
        Box::pin(async move {
            Ok(self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&key))
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<RepositoryKey>, StorageError>> {
        Box::pin(async move {
            Ok(self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> RepositoryKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn fs_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsSnapshotStorage::new(dir.path());
        let k = key("acme/widgets");

        assert!(storage.read(&k).await.unwrap().is_none());
        storage.write(&k, b"head\nbody".to_vec()).await.unwrap();
        assert_eq!(storage.read(&k).await.unwrap().unwrap(), b"head\nbody");
        assert_eq!(storage.read_header(&k).await.unwrap().unwrap(), b"head");
        assert!(storage.exists(&k).await.unwrap());
        assert!(storage.snapshot_path(&k).ends_with("acme__widgets/snapshot.idx"));

        assert!(storage.remove(&k).await.unwrap());
        assert!(!storage.remove(&k).await.unwrap());
        assert!(!storage.exists(&k).await.unwrap());
    }

    #[tokio::test]
    async fn fs_write_replaces_without_leaving_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsSnapshotStorage::new(dir.path());
        let k = key("acme/widgets");
        storage.write(&k, b"one".to_vec()).await.unwrap();
        storage.write(&k, b"two".to_vec()).await.unwrap();
        assert_eq!(storage.read(&k).await.unwrap().unwrap(), b"two");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("acme__widgets"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("snapshot.idx")]);
    }

    #[tokio::test]
    async fn fs_keys_skip_foreign_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsSnapshotStorage::new(dir.path());
        storage.write(&key("b/two"), b"x".to_vec()).await.unwrap();
        storage.write(&key("a/one"), b"x".to_vec()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("not-a-key")).unwrap();
        std::fs::create_dir_all(dir.path().join("c__empty")).unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec![key("a/one"), key("b/two")]);
    }

    #[tokio::test]
    async fn fs_keys_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsSnapshotStorage::new(dir.path().join("absent"));
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemorySnapshotStorage::new();
        let k = key("acme/widgets");
        storage.write(&k, b"h\np".to_vec()).await.unwrap();
        assert_eq!(storage.read_header(&k).await.unwrap().unwrap(), b"h");
        assert_eq!(storage.keys().await.unwrap(), vec![k.clone()]);
        assert!(storage.remove(&k).await.unwrap());
        assert!(storage.read(&k).await.unwrap().is_none());
    }
}
