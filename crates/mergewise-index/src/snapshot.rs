//! Per-repository index state: chunk metadata, file records and the vector index,
//! kept in bijection.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::storage::SnapshotStorage;
use crate::types::{Chunk, RepositoryKey, ScoredChunk};
use crate::vector::VectorIndex;

/// What the snapshot knows about one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Blob identifier reported by the content provider.
    pub blob_sha: String,
    /// blake3 of the file bytes.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Lang>,
    /// Chunks of this file present in the snapshot, in line order.
    pub chunk_ids: Vec<String>,
    /// `false` when some chunks could not be embedded and must be retried.
    pub complete: bool,
}

impl FileRecord {
    #[must_use]
    pub fn new(blob_sha: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            blob_sha: blob_sha.into(),
            content_hash: content_hash.into(),
            language: None,
            chunk_ids: Vec::new(),
            complete: true,
        }
    }
}

/// Counts from replacing one file's chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileChange {
    pub removed: usize,
    pub inserted: usize,
    pub unembedded: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub(crate) repository_key: RepositoryKey,
    pub(crate) commit_ref: Option<String>,
    pub(crate) files: BTreeMap<String, FileRecord>,
    pub(crate) chunks: BTreeMap<String, Chunk>,
    pub(crate) index: VectorIndex,
    /// Paths whose content could not be fetched during the last build.
    pub(crate) pending: BTreeSet<String>,
    /// Requested paths the build at `commit_ref` could not index: absent from the tree
    /// or outside the selection rules.
    pub(crate) skipped: BTreeSet<String>,
    pub(crate) last_used_ms: u64,
}

impl IndexSnapshot {
    #[must_use]
    pub fn new(repository_key: RepositoryKey) -> Self {
        Self {
            repository_key,
            commit_ref: None,
            files: BTreeMap::new(),
            chunks: BTreeMap::new(),
            index: VectorIndex::new(),
            pending: BTreeSet::new(),
            skipped: BTreeSet::new(),
            last_used_ms: 0,
        }
    }

    #[must_use]
    pub fn repository_key(&self) -> &RepositoryKey {
        &self.repository_key
    }

    /// The commit this snapshot reflects; `None` until a build completes.
    #[must_use]
    pub fn commit_ref(&self) -> Option<&str> {
        self.commit_ref.as_deref()
    }

    pub fn set_commit_ref(&mut self, commit_ref: impl Into<String>) {
        self.commit_ref = Some(commit_ref.into());
    }

    #[must_use]
    pub fn last_used_ms(&self) -> u64 {
        self.last_used_ms
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_used_ms = self.last_used_ms.max(now_ms);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileRecord)> {
        self.files.iter().map(|(p, r)| (p.as_str(), r))
    }

    #[must_use]
    pub fn pending(&self) -> &BTreeSet<String> {
        &self.pending
    }

    /// Whether a build at the current commit already handled `path`, indexed or not.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.skipped.contains(path)
    }

    #[must_use]
    pub fn chunk(&self, document_id: &str) -> Option<&Chunk> {
        self.chunks.get(document_id)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    #[must_use]
    pub fn embedding(&self, document_id: &str) -> Option<&[f32]> {
        self.index.get(document_id)
    }

    /// Chunks of one file ordered by `start_line`.
    #[must_use]
    pub fn chunks_for_file(&self, path: &str) -> Vec<&Chunk> {
        let Some(record) = self.files.get(path) else {
            return Vec::new();
        };
        let mut out: Vec<&Chunk> = record
            .chunk_ids
            .iter()
            .filter_map(|id| self.chunks.get(id))
            .collect();
        out.sort_by_key(|c| c.start_line);
        out
    }

    /// Every file is complete and nothing is waiting on a failed fetch.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.files.values().all(|r| r.complete)
    }

    /// Insert or replace one chunk and its vector.
    ///
    /// # Errors
    ///
    /// Returns the vector index error; the snapshot is unchanged on error.
    pub fn upsert_chunk(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        self.index.upsert(&chunk.document_id, vector)?;
        let record = self
            .files
            .entry(chunk.file_path.clone())
            .or_insert_with(|| FileRecord {
                complete: false,
                ..FileRecord::new("", "")
            });
        if !record.chunk_ids.contains(&chunk.document_id) {
            record.chunk_ids.push(chunk.document_id.clone());
        }
        self.chunks.insert(chunk.document_id.clone(), chunk);
        Ok(())
    }

    /// Remove one chunk and its vector. Returns whether it existed.
    pub fn remove_chunk(&mut self, document_id: &str) -> bool {
        let Some(chunk) = self.chunks.remove(document_id) else {
            return false;
        };
        self.index.remove(document_id);
        if let Some(record) = self.files.get_mut(&chunk.file_path) {
            record.chunk_ids.retain(|id| id != document_id);
        }
        true
    }

    /// Drop a file and all of its chunks. Returns the number of chunks removed.
    pub fn remove_file(&mut self, path: &str) -> usize {
        let Some(record) = self.files.remove(path) else {
            return 0;
        };
        let mut removed = 0;
        for id in &record.chunk_ids {
            if self.chunks.remove(id).is_some() {
                removed += 1;
            }
            self.index.remove(id);
        }
        removed
    }

    /// Check that every present vector fits the index and agrees with the others.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` or `NonFiniteVector` for the first unusable vector.
    pub fn validate_entries(&self, entries: &[(Chunk, Option<Vec<f32>>)]) -> Result<()> {
        let mut dimension = self.index.dimension();
        for (chunk, vector) in entries {
            let Some(vector) = vector else { continue };
            match dimension {
                Some(d) if d != vector.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected: d,
                        actual: vector.len(),
                    });
                }
                _ => dimension = Some(vector.len()),
            }
            self.index.validate(&chunk.document_id, vector)?;
        }
        Ok(())
    }

    /// Replace everything known about `path` with `record` and the given chunks.
    ///
    /// Chunks without a vector are left out and mark the record incomplete. All vectors
    /// are validated before anything is modified, so on error the snapshot is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` or `NonFiniteVector` for an unusable vector.
    pub fn replace_file(
        &mut self,
        path: &str,
        mut record: FileRecord,
        entries: Vec<(Chunk, Option<Vec<f32>>)>,
    ) -> Result<FileChange> {
        self.validate_entries(&entries)?;

        let mut change = FileChange {
            removed: self.remove_file(path),
            ..FileChange::default()
        };
        record.chunk_ids.clear();
        for (chunk, vector) in entries {
            let Some(vector) = vector else {
                change.unembedded += 1;
                continue;
            };
            self.index.upsert(&chunk.document_id, vector)?;
            record.chunk_ids.push(chunk.document_id.clone());
            self.chunks.insert(chunk.document_id.clone(), chunk);
            change.inserted += 1;
        }
        record.complete = change.unembedded == 0;
        self.files.insert(path.to_owned(), record);
        Ok(change)
    }

    /// Nearest chunks to `query`, highest score first.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` for a query of the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let hits = self.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                self.chunks
                    .get(&hit.document_id)
                    .map(|c| ScoredChunk::new(c.clone(), hit.score))
            })
            .collect())
    }

    /// Chunks and vectors are in bijection, and every chunk is listed by exactly its
    /// own file record.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.chunks.len() != self.index.len()
            || !self.index.ids().all(|id| self.chunks.contains_key(id))
        {
            return false;
        }
        let mut listed = 0usize;
        for (path, record) in &self.files {
            for id in &record.chunk_ids {
                match self.chunks.get(id) {
                    Some(c) if &c.file_path == path => listed += 1,
                    _ => return false,
                }
            }
        }
        listed == self.chunks.len()
    }

    /// Load the persisted snapshot for `key`.
    ///
    /// Missing, unreadable and corrupt snapshots all come back as an empty snapshot,
    /// which the caller treats as "rebuild required". Corruption is logged.
    pub async fn load(storage: &dyn SnapshotStorage, key: &RepositoryKey) -> Self {
        let bytes = match storage.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(repository = %key, "no persisted snapshot");
                return Self::new(key.clone());
            }
            Err(e) => {
                tracing::warn!(repository = %key, "snapshot read failed, starting empty: {e}");
                return Self::new(key.clone());
            }
        };
        match codec::decode(&bytes) {
            Ok(snapshot) if &snapshot.repository_key == key => {
                tracing::debug!(
                    repository = %key,
                    chunks = snapshot.len(),
                    commit = snapshot.commit_ref().unwrap_or("-"),
                    "snapshot loaded"
                );
                snapshot
            }
            Ok(snapshot) => {
                tracing::warn!(
                    repository = %key,
                    found = %snapshot.repository_key,
                    "snapshot belongs to another repository, starting empty"
                );
                Self::new(key.clone())
            }
            Err(e) => {
                tracing::warn!(repository = %key, "discarding unreadable snapshot: {e}");
                Self::new(key.clone())
            }
        }
    }

    /// Serialize and write the snapshot, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an encoding error or the storage write error.
    pub async fn persist(&self, storage: &dyn SnapshotStorage) -> Result<()> {
        let bytes = codec::encode(self)?;
        storage.write(&self.repository_key, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;

    fn key() -> RepositoryKey {
        "acme/widgets".parse().unwrap()
    }

    fn chunk(id: &str, path: &str, start: usize) -> Chunk {
        Chunk {
            document_id: id.into(),
            file_path: path.into(),
            start_line: start,
            end_line: start + 4,
            chunk_type: ChunkType::CodeUnit,
            kind: "function_definition".into(),
            label: None,
            language: Some(Lang::Python),
            content: format!("def f{start}(): pass"),
        }
    }

    #[test]
    fn replace_file_swaps_chunks() {
        let mut s = IndexSnapshot::new(key());
        let change = s
            .replace_file(
                "a.py",
                FileRecord::new("sha1", "h1"),
                vec![
                    (chunk("a1", "a.py", 1), Some(vec![1.0, 0.0])),
                    (chunk("a2", "a.py", 6), Some(vec![0.0, 1.0])),
                ],
            )
            .unwrap();
        assert_eq!(change.inserted, 2);
        assert!(s.is_consistent());

        let change = s
            .replace_file(
                "a.py",
                FileRecord::new("sha2", "h2"),
                vec![(chunk("a3", "a.py", 1), Some(vec![1.0, 1.0]))],
            )
            .unwrap();
        assert_eq!(change.removed, 2);
        assert_eq!(s.len(), 1);
        assert!(s.chunk("a1").is_none());
        assert_eq!(s.file("a.py").unwrap().blob_sha, "sha2");
        assert!(s.is_consistent());
    }

    #[test]
    fn unembedded_chunks_mark_record_incomplete() {
        let mut s = IndexSnapshot::new(key());
        let change = s
            .replace_file(
                "a.py",
                FileRecord::new("sha1", "h1"),
                vec![
                    (chunk("a1", "a.py", 1), Some(vec![1.0])),
                    (chunk("a2", "a.py", 6), None),
                ],
            )
            .unwrap();
        assert_eq!(change.unembedded, 1);
        assert!(!s.file("a.py").unwrap().complete);
        assert!(!s.is_settled());
        assert!(s.is_consistent());
    }

    #[test]
    fn replace_file_is_atomic_on_dimension_error() {
        let mut s = IndexSnapshot::new(key());
        s.replace_file(
            "a.py",
            FileRecord::new("sha1", "h1"),
            vec![(chunk("a1", "a.py", 1), Some(vec![1.0, 0.0]))],
        )
        .unwrap();
        let before = s.clone();
        let err = s.replace_file(
            "a.py",
            FileRecord::new("sha2", "h2"),
            vec![
                (chunk("b1", "a.py", 1), Some(vec![1.0, 0.0])),
                (chunk("b2", "a.py", 6), Some(vec![1.0, 0.0, 0.0])),
            ],
        );
        assert!(err.is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn chunks_for_file_are_line_ordered() {
        let mut s = IndexSnapshot::new(key());
        s.upsert_chunk(chunk("z", "b.py", 20), vec![1.0]).unwrap();
        s.upsert_chunk(chunk("y", "b.py", 1), vec![1.0]).unwrap();
        let starts: Vec<_> = s.chunks_for_file("b.py").iter().map(|c| c.start_line).collect();
        assert_eq!(starts, vec![1, 20]);
        assert!(s.chunks_for_file("missing.py").is_empty());
    }

    #[test]
    fn remove_file_clears_both_sides() {
        let mut s = IndexSnapshot::new(key());
        s.upsert_chunk(chunk("a1", "a.py", 1), vec![1.0]).unwrap();
        s.upsert_chunk(chunk("b1", "b.py", 1), vec![1.0]).unwrap();
        assert_eq!(s.remove_file("a.py"), 1);
        assert!(s.embedding("a1").is_none());
        assert!(s.is_consistent());
        assert_eq!(s.search(&[1.0], 10).unwrap().len(), 1);
    }

    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(u8, u8),
        Remove(u8),
        RemoveFile(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12, 0u8..3).prop_map(|(id, file)| Op::Upsert(id, file)),
            (0u8..12).prop_map(Op::Remove),
            (0u8..3).prop_map(Op::RemoveFile),
        ]
    }

    proptest! {
        #[test]
        fn bijection_survives_any_operation_sequence(ops in proptest::collection::vec(op(), 0..60)) {
            let mut s = IndexSnapshot::new(key());
            for op in ops {
                match op {
                    Op::Upsert(id, file) => {
                        let id = format!("doc-{id}");
                        // A document id always lives in one file.
                        let path = s.chunk(&id).map_or_else(|| format!("f{file}.py"), |c| c.file_path.clone());
                        s.upsert_chunk(chunk(&id, &path, 1), vec![1.0, f32::from(file)]).unwrap();
                    }
                    Op::Remove(id) => {
                        s.remove_chunk(&format!("doc-{id}"));
                    }
                    Op::RemoveFile(file) => {
                        s.remove_file(&format!("f{file}.py"));
                    }
                }
                prop_assert!(s.is_consistent());
            }
        }
    }
}
