//! Repository content providers: tree listings and blob contents per commit.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::types::{RepositoryKey, content_hash};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("content provider unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One file in a repository tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub blob_sha: String,
    /// Blob size in bytes, when the provider reports it.
    pub size: Option<u64>,
}

/// Content provider contract. `get_content` must be idempotent for a fixed
/// `(repository, blob_sha)`.
pub trait RepositorySource: Send + Sync {
    fn list_tree(
        &self,
        repository: &RepositoryKey,
        commit_ref: &str,
    ) -> BoxFuture<'_, Result<Vec<TreeEntry>, SourceError>>;

    fn get_content(
        &self,
        repository: &RepositoryKey,
        blob_sha: &str,
    ) -> BoxFuture<'_, Result<Vec<u8>, SourceError>>;
}

#[derive(Debug, Default)]
struct MemoryTrees {
    trees: HashMap<(RepositoryKey, String), Vec<TreeEntry>>,
    blobs: HashMap<String, Vec<u8>>,
    blob_paths: HashMap<String, String>,
    failing_paths: HashSet<String>,
    fail_listing: bool,
}

/// In-memory provider for tests: commits map to trees, blobs are addressed by
/// their blake3 digest.
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: RwLock<MemoryTrees>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the full tree of `commit_ref`.
    pub fn add_commit<P, C>(
        &self,
        repository: &RepositoryKey,
        commit_ref: &str,
        files: impl IntoIterator<Item = (P, C)>,
    ) where
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut tree = Vec::new();
        for (path, content) in files {
            let path = path.into();
            let content = content.into();
            let sha = content_hash(&content);
            tree.push(TreeEntry {
                path: path.clone(),
                blob_sha: sha.clone(),
                size: u64::try_from(content.len()).ok(),
            });
            inner.blob_paths.insert(sha.clone(), path);
            inner.blobs.insert(sha, content);
        }
        tree.sort_by(|a, b| a.path.cmp(&b.path));
        inner
            .trees
            .insert((repository.clone(), commit_ref.to_owned()), tree);
    }

    /// Make content fetches for `path` fail as unavailable.
    pub fn fail_path(&self, path: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .failing_paths
            .insert(path.to_owned());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_listing = fail;
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.failing_paths.clear();
        inner.fail_listing = false;
    }

    #[must_use]
    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

impl RepositorySource for MemorySource {
    fn list_tree(
        &self,
        repository: &RepositoryKey,
        commit_ref: &str,
    ) -> BoxFuture<'_, Result<Vec<TreeEntry>, SourceError>> {
        let key = (repository.clone(), commit_ref.to_owned());
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::Relaxed);
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if inner.fail_listing {
                return Err(SourceError::Unavailable(format!("{}@{}", key.0, key.1)));
            }
            inner
                .trees
                .get(&key)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(format!("{}@{}", key.0, key.1)))
        })
    }

    fn get_content(
        &self,
        _repository: &RepositoryKey,
        blob_sha: &str,
    ) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        let sha = blob_sha.to_owned();
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::Relaxed);
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(path) = inner.blob_paths.get(&sha)
                && inner.failing_paths.contains(path)
            {
                return Err(SourceError::Unavailable(path.clone()));
            }
            inner
                .blobs
                .get(&sha)
                .cloned()
                .ok_or(SourceError::NotFound(sha))
        })
    }
}

/// Serves a local working directory as a repository tree.
///
/// The walk honors `.gitignore` (also outside a git checkout) and skips hidden files.
/// Blob shas are blake3 digests of the file bytes, so the commit reference passed to
/// `list_tree` is informational.
#[derive(Debug)]
pub struct LocalTreeSource {
    root: PathBuf,
    blobs: RwLock<HashMap<String, PathBuf>>,
}

impl LocalTreeSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk(root: &Path) -> Result<Vec<(TreeEntry, PathBuf)>, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::NotFound(root.display().to_string()));
    }
    let mut out = Vec::new();
    for entry in ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .build()
        .flatten()
    {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path().to_path_buf();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(path = %path.display(), "skipping unreadable file: {e}");
                continue;
            }
        };
        out.push((
            TreeEntry {
                path: relative_path(root, &path),
                blob_sha: content_hash(&bytes),
                size: u64::try_from(bytes.len()).ok(),
            },
            path,
        ));
    }
    out.sort_by(|a, b| a.0.path.cmp(&b.0.path));
    Ok(out)
}

impl RepositorySource for LocalTreeSource {
    fn list_tree(
        &self,
        repository: &RepositoryKey,
        commit_ref: &str,
    ) -> BoxFuture<'_, Result<Vec<TreeEntry>, SourceError>> {
        let root = self.root.clone();
        let repository = repository.clone();
        let commit_ref = commit_ref.to_owned();
        Box::pin(async move {
            let walked = tokio::task::spawn_blocking(move || walk(&root))
                .await
                .map_err(|e| SourceError::Unavailable(format!("tree walk aborted: {e}")))??;
            tracing::debug!(
                repository = %repository,
                commit = %commit_ref,
                files = walked.len(),
                "listed local tree"
            );
            let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
            Ok(walked
                .into_iter()
                .map(|(entry, abs)| {
                    blobs.insert(entry.blob_sha.clone(), abs);
                    entry
                })
                .collect())
        })
    }

    fn get_content(
        &self,
        _repository: &RepositoryKey,
        blob_sha: &str,
    ) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
        let path = self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(blob_sha)
            .cloned();
        let sha = blob_sha.to_owned();
        Box::pin(async move {
            let path = path.ok_or(SourceError::NotFound(sha))?;
            tokio::fs::read(&path)
                .await
                .map_err(|source| SourceError::Io { path, source })
        })
    }
}
