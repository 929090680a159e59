//! Context store: per-repository snapshots, incremental builds and retrieval.
//!
//! Each repository gets a slot holding its current snapshot behind an `Arc`. Builds
//! run under the slot's writer lock, work on a private copy and swap it in only when
//! complete, so readers never see a half-applied build and a cancelled build leaves
//! the previous snapshot untouched. Readers take the `Arc` and search without locks.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use mergewise_llm::LlmProvider;

use crate::chunker::{Chunker, ChunkerConfig};
use crate::codec;
use crate::context::embedding_text;
use crate::embedder::{EmbeddingConfig, EmbeddingGateway};
use crate::error::Result;
use crate::languages::detect_language;
use crate::plan::{IndexScope, SelectionLimits, select_paths};
use crate::query::{DiffHunk, QueryConfig, RetrievalQuery, query_texts};
use crate::rerank::{AnyReranker, RerankQuery, Reranker, is_permutation};
use crate::snapshot::{FileRecord, IndexSnapshot};
use crate::source::{RepositorySource, TreeEntry};
use crate::storage::SnapshotStorage;
use crate::types::{Chunk, RepositoryKey, ScoredChunk, content_hash, document_id};

/// Milliseconds since the Unix epoch, or a test clock.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    })
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not ask for a specific count.
    pub top_k: usize,
    /// Candidates fetched per query text, as a multiple of `k`.
    pub oversample_factor: usize,
    pub query: QueryConfig,
    pub rerank_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            oversample_factor: 3,
            query: QueryConfig::default(),
            rerank_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextStoreConfig {
    /// When `false`, builds do nothing and retrieval returns no context.
    pub enabled: bool,
    pub scope: IndexScope,
    pub max_files: usize,
    pub max_file_bytes: u64,
    /// Persisted snapshots kept before the least recently used are evicted; 0 keeps all.
    pub max_snapshots: usize,
    pub chunker: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: IndexScope::Full,
            max_files: 200,
            max_file_bytes: 80_000,
            max_snapshots: 16,
            chunker: ChunkerConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Uninitialized,
    Building,
    Ready,
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Building => "building",
            Self::Ready => "ready",
        })
    }
}

/// What one `ensure_index` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub chunks_removed: usize,
    pub chunks_unembedded: usize,
    pub embedding_calls: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
    /// Whether the final order came from the reranker.
    pub reranked: bool,
}

impl RetrievalResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Default)]
struct SlotState {
    snapshot: Option<Arc<IndexSnapshot>>,
    /// Storage has been consulted for this repository.
    loaded: bool,
}

#[derive(Default)]
struct RepoSlot {
    build_lock: tokio::sync::Mutex<()>,
    state: RwLock<SlotState>,
    building: AtomicBool,
    last_used_ms: AtomicU64,
}

impl RepoSlot {
    fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    fn is_loaded(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded
    }

    fn install(&self, snapshot: Option<Arc<IndexSnapshot>>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = snapshot;
        state.loaded = true;
    }

    fn reset(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = SlotState::default();
        self.last_used_ms.store(0, Ordering::Relaxed);
    }

    fn touch(&self, now_ms: u64) {
        self.last_used_ms.fetch_max(now_ms, Ordering::Relaxed);
    }
}

/// Marks a slot as building for as long as it lives.
struct BuildingFlag<'a>(&'a AtomicBool);

impl<'a> BuildingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BuildingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A file whose chunks are ready to be written, waiting for missing embeddings.
struct PreparedFile {
    path: String,
    record: FileRecord,
    chunks: Vec<Chunk>,
    vectors: Vec<Option<Vec<f32>>>,
    /// `(chunk index, embedding text)` for chunks without a vector yet.
    to_embed: Vec<(usize, String)>,
}

pub struct ContextStore<P> {
    config: ContextStoreConfig,
    source: Arc<dyn RepositorySource>,
    storage: Arc<dyn SnapshotStorage>,
    chunker: Chunker,
    gateway: EmbeddingGateway<P>,
    reranker: Option<AnyReranker<P>>,
    clock: Clock,
    slots: Mutex<HashMap<RepositoryKey, Arc<RepoSlot>>>,
}

impl<P> std::fmt::Debug for ContextStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("config", &self.config)
            .field("reranker", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> ContextStore<P> {
    #[must_use]
    pub fn new(
        config: ContextStoreConfig,
        source: Arc<dyn RepositorySource>,
        storage: Arc<dyn SnapshotStorage>,
        provider: Arc<P>,
    ) -> Self {
        Self {
            chunker: Chunker::new(config.chunker.clone()),
            gateway: EmbeddingGateway::new(provider, config.embedding.clone()),
            config,
            source,
            storage,
            reranker: None,
            clock: system_clock(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: AnyReranker<P>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ContextStoreConfig {
        &self.config
    }

    /// Handle for the review path of one repository.
    #[must_use]
    pub fn repository(&self, key: RepositoryKey) -> RepositoryContext<'_, P> {
        RepositoryContext { store: self, key }
    }

    /// Current snapshot of `key`, loading it from storage on first use.
    pub async fn snapshot(&self, key: &RepositoryKey) -> Option<Arc<IndexSnapshot>> {
        let slot = self.slot(key);
        self.current(&slot, key).await
    }

    pub async fn index_status(&self, key: &RepositoryKey) -> IndexStatus {
        let slot = self.slot(key);
        if slot.building.load(Ordering::SeqCst) {
            return IndexStatus::Building;
        }
        if slot.snapshot().is_some() {
            return IndexStatus::Ready;
        }
        if slot.is_loaded() {
            return IndexStatus::Uninitialized;
        }
        match self.storage.exists(key).await {
            Ok(true) => IndexStatus::Ready,
            Ok(false) => IndexStatus::Uninitialized,
            Err(e) => {
                tracing::warn!(repository = %key, "cannot check persisted snapshot: {e}");
                IndexStatus::Uninitialized
            }
        }
    }

    /// Delete the persisted and in-memory snapshot of `key`, after any in-flight build.
    /// Returns whether anything existed.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the persisted snapshot cannot be removed.
    pub async fn drop_index(&self, key: &RepositoryKey) -> Result<bool> {
        let slot = self.slot(key);
        let _guard = slot.build_lock.lock().await;
        let in_memory = slot.snapshot().is_some();
        let persisted = self.storage.remove(key).await?;
        slot.reset();
        tracing::info!(repository = %key, in_memory, persisted, "index dropped");
        Ok(in_memory || persisted)
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn slot(&self, key: &RepositoryKey) -> Arc<RepoSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &RepositoryKey) -> Option<Arc<RepoSlot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    async fn current(
        &self,
        slot: &RepoSlot,
        key: &RepositoryKey,
    ) -> Option<Arc<IndexSnapshot>> {
        if slot.is_loaded() {
            return slot.snapshot();
        }
        let _guard = slot.build_lock.lock().await;
        self.load_locked(slot, key).await
    }

    /// Caller holds the slot's build lock.
    async fn load_locked(
        &self,
        slot: &RepoSlot,
        key: &RepositoryKey,
    ) -> Option<Arc<IndexSnapshot>> {
        if slot.is_loaded() {
            return slot.snapshot();
        }
        let loaded = IndexSnapshot::load(self.storage.as_ref(), key).await;
        let snapshot = (loaded.commit_ref().is_some() || !loaded.is_empty()).then(|| {
            slot.touch(loaded.last_used_ms());
            Arc::new(loaded)
        });
        slot.install(snapshot.clone());
        snapshot
    }

    async fn ensure_index(
        &self,
        key: &RepositoryKey,
        commit_ref: &str,
        paths: &[String],
    ) -> IndexReport {
        if !self.config.enabled {
            tracing::debug!(repository = %key, "context indexing disabled");
            return IndexReport::default();
        }
        let start = Instant::now();
        let slot = self.slot(key);
        let _guard = slot.build_lock.lock().await;
        let previous = self.load_locked(&slot, key).await;

        if let Some(snapshot) = previous.as_deref()
            && snapshot.commit_ref() == Some(commit_ref)
            && snapshot.is_settled()
            && paths.iter().all(|p| snapshot.covers(p))
        {
            slot.touch(self.now());
            tracing::debug!(repository = %key, commit = commit_ref, "index up to date");
            return IndexReport {
                files_unchanged: snapshot.files().count(),
                duration_ms: elapsed_ms(start),
                ..IndexReport::default()
            };
        }

        let _building = BuildingFlag::raise(&slot.building);
        let mut report = IndexReport::default();
        let tree = match self.source.list_tree(key, commit_ref).await {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(
                    repository = %key,
                    commit = commit_ref,
                    "cannot list repository tree, keeping current index: {e}"
                );
                if previous.is_none() {
                    slot.install(Some(Arc::new(IndexSnapshot::new(key.clone()))));
                }
                report.duration_ms = elapsed_ms(start);
                return report;
            }
        };

        let mut next = previous
            .as_deref()
            .cloned()
            .unwrap_or_else(|| IndexSnapshot::new(key.clone()));
        let before: BTreeSet<String> = next.chunks.keys().cloned().collect();
        self.build(&mut next, commit_ref, &tree, paths, &mut report)
            .await;
        let after: BTreeSet<&String> = next.chunks.keys().collect();
        report.chunks_created = after.iter().filter(|id| !before.contains(**id)).count();
        report.chunks_removed = before.iter().filter(|id| !after.contains(id)).count();

        if next.commit_ref() != Some(commit_ref) {
            next.skipped.clear();
        }
        let skipped: Vec<String> = paths
            .iter()
            .filter(|p| !next.files.contains_key(*p) && !next.pending.contains(*p))
            .cloned()
            .collect();
        next.skipped.extend(skipped);
        next.skipped.retain(|p| !next.files.contains_key(p));

        let now = self.now();
        next.set_commit_ref(commit_ref);
        next.touch(now.max(slot.last_used_ms.load(Ordering::Relaxed)));
        slot.touch(now);
        let persisted = match next.persist(self.storage.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(repository = %key, "cannot persist snapshot, keeping it in memory: {e}");
                false
            }
        };
        slot.install(Some(Arc::new(next)));
        report.duration_ms = elapsed_ms(start);
        tracing::info!(
            repository = %key,
            commit = commit_ref,
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            removed = report.files_removed,
            failed = report.files_failed,
            created = report.chunks_created,
            unembedded = report.chunks_unembedded,
            calls = report.embedding_calls,
            "index built"
        );
        if persisted {
            self.enforce_retention(key).await;
        }
        report
    }

    async fn build(
        &self,
        next: &mut IndexSnapshot,
        commit_ref: &str,
        tree: &[TreeEntry],
        paths: &[String],
        report: &mut IndexReport,
    ) {
        let key = next.repository_key.clone();
        report.files_scanned = tree.len();

        let limits = SelectionLimits {
            scope: self.config.scope,
            max_files: self.config.max_files,
            max_file_bytes: self.config.max_file_bytes,
        };
        let same_commit = next.commit_ref() == Some(commit_ref);
        let mut selected = select_paths(tree, paths, &next.files, &limits);
        if same_commit {
            let chosen: HashSet<&str> = selected.iter().map(|e| e.path.as_str()).collect();
            let carried: Vec<&TreeEntry> = tree
                .iter()
                .filter(|e| next.files.contains_key(&e.path) && !chosen.contains(e.path.as_str()))
                .collect();
            selected.extend(carried);
        }
        let keep: HashSet<&str> = selected.iter().map(|e| e.path.as_str()).collect();

        let stale: Vec<String> = next
            .files
            .keys()
            .filter(|p| !keep.contains(p.as_str()))
            .cloned()
            .collect();
        for path in stale {
            next.remove_file(&path);
            report.files_removed += 1;
        }
        next.pending.retain(|p| keep.contains(p.as_str()));
        if next.is_empty() {
            next.index.clear();
        }

        let mut prepared = Vec::new();
        for entry in selected {
            if let Some(record) = next.file(&entry.path)
                && record.blob_sha == entry.blob_sha
                && record.complete
            {
                report.files_unchanged += 1;
                next.pending.remove(&entry.path);
                continue;
            }
            let bytes = match self.source.get_content(&key, &entry.blob_sha).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(repository = %key, file = %entry.path, "skipping file, content fetch failed: {e}");
                    report.files_failed += 1;
                    next.pending.insert(entry.path.clone());
                    continue;
                }
            };
            next.pending.remove(&entry.path);
            let hash = content_hash(&bytes);
            if let Some(record) = next.files.get_mut(&entry.path)
                && record.content_hash == hash
                && record.complete
            {
                record.blob_sha.clone_from(&entry.blob_sha);
                report.files_unchanged += 1;
                continue;
            }
            prepared.push(self.prepare(next, entry, &bytes, hash));
        }

        self.embed_missing(&mut prepared, next, report).await;

        for file in prepared {
            report.files_indexed += 1;
            let PreparedFile {
                path,
                record,
                chunks,
                vectors,
                ..
            } = file;
            let mut entries: Vec<_> = chunks.into_iter().zip(vectors).collect();
            if let Err(e) = next.validate_entries(&entries) {
                tracing::warn!(repository = %key, file = %path, "discarding embeddings: {e}");
                for (_, vector) in &mut entries {
                    *vector = None;
                }
            }
            match next.replace_file(&path, record, entries) {
                Ok(change) => report.chunks_unembedded += change.unembedded,
                Err(e) => {
                    tracing::warn!(repository = %key, file = %path, "cannot update file: {e}");
                    report.files_failed += 1;
                }
            }
        }
    }

    fn prepare(
        &self,
        snapshot: &IndexSnapshot,
        entry: &TreeEntry,
        bytes: &[u8],
        hash: String,
    ) -> PreparedFile {
        let key = snapshot.repository_key();
        let lang = detect_language(Path::new(&entry.path));
        let spans = self.chunker.chunk_bytes(&entry.path, bytes, lang);
        let mut file = PreparedFile {
            path: entry.path.clone(),
            record: FileRecord {
                language: lang,
                ..FileRecord::new(entry.blob_sha.clone(), hash.clone())
            },
            chunks: Vec::with_capacity(spans.len()),
            vectors: Vec::with_capacity(spans.len()),
            to_embed: Vec::new(),
        };
        for span in spans {
            let id = document_id(key, &entry.path, &hash, span.start_line, span.end_line);
            // Chunks already embedded by an earlier, incomplete build keep their vectors.
            let existing = snapshot.embedding(&id).map(<[f32]>::to_vec);
            if existing.is_none() {
                file.to_embed
                    .push((file.chunks.len(), embedding_text(&span, &entry.path, lang)));
            }
            file.vectors.push(existing);
            file.chunks.push(Chunk {
                document_id: id,
                file_path: entry.path.clone(),
                start_line: span.start_line,
                end_line: span.end_line,
                chunk_type: span.chunk_type,
                kind: span.kind,
                label: span.label,
                language: lang,
                content: span.content,
            });
        }
        file
    }

    /// One batched embedding pass over every chunk that still needs a vector.
    async fn embed_missing(
        &self,
        prepared: &mut [PreparedFile],
        snapshot: &IndexSnapshot,
        report: &mut IndexReport,
    ) {
        let mut owners = Vec::new();
        let mut texts = Vec::new();
        for (f, file) in prepared.iter_mut().enumerate() {
            for (c, text) in file.to_embed.drain(..) {
                owners.push((f, c));
                texts.push(text);
            }
        }
        if texts.is_empty() {
            return;
        }
        let outcome = self.gateway.embed_all(&texts, snapshot.dimension()).await;
        report.embedding_calls += outcome.calls;
        if outcome.batches_dropped > 0 {
            tracing::warn!(
                repository = %snapshot.repository_key(),
                dropped = outcome.batches_dropped,
                unembedded = texts.len() - outcome.embedded(),
                "some chunks stay unembedded until the next build"
            );
        }
        for ((f, c), vector) in owners.into_iter().zip(outcome.vectors) {
            prepared[f].vectors[c] = vector;
        }
    }

    async fn retrieve(&self, key: &RepositoryKey, query: &RetrievalQuery) -> RetrievalResult {
        if !self.config.enabled || query.k == 0 {
            return RetrievalResult::default();
        }
        let slot = self.slot(key);
        let Some(snapshot) = self.current(&slot, key).await else {
            tracing::debug!(repository = %key, "no index, retrieving nothing");
            return RetrievalResult::default();
        };
        if snapshot.chunks_for_file(&query.file_path).is_empty() {
            tracing::debug!(repository = %key, file = %query.file_path, "file not indexed, no context");
            return RetrievalResult::default();
        }
        let texts = query_texts(query, &self.config.retrieval.query);
        if texts.is_empty() {
            return RetrievalResult::default();
        }
        let Some(vectors) = self
            .gateway
            .embed_queries(&texts, snapshot.dimension())
            .await
        else {
            tracing::warn!(repository = %key, file = %query.file_path, "query embedding failed, proceeding without context");
            return RetrievalResult::default();
        };
        slot.touch(self.now());

        let per_query = query
            .k
            .saturating_mul(self.config.retrieval.oversample_factor.max(1));
        let mut best: HashMap<String, ScoredChunk> = HashMap::new();
        for vector in &vectors {
            let hits = match snapshot.search(vector, per_query) {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(repository = %key, "skipping query vector: {e}");
                    continue;
                }
            };
            for hit in hits {
                match best.entry(hit.document_id().to_owned()) {
                    Entry::Occupied(mut seen) => {
                        if hit.score > seen.get().score {
                            seen.insert(hit);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(hit);
                    }
                }
            }
        }
        let mut candidates: Vec<ScoredChunk> = best.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id().cmp(b.document_id()))
        });

        let mut reranked = false;
        if let Some(reranker) = &self.reranker
            && candidates.len() > 1
        {
            let rerank_query = RerankQuery {
                file_path: query.file_path.clone(),
                query_texts: texts,
                k: query.k,
            };
            let attempt = tokio::time::timeout(
                self.config.retrieval.rerank_timeout,
                reranker.rerank(&rerank_query, candidates.clone()),
            )
            .await;
            match attempt {
                Ok(Ok(ordered)) if is_permutation(&candidates, &ordered) => {
                    candidates = ordered;
                    reranked = true;
                }
                Ok(Ok(_)) => tracing::warn!(
                    reranker = reranker.name(),
                    "reranker changed the candidate set, keeping vector order"
                ),
                Ok(Err(e)) => tracing::warn!(
                    reranker = reranker.name(),
                    "reranker failed, keeping vector order: {e}"
                ),
                Err(_) => tracing::warn!(
                    reranker = reranker.name(),
                    "reranker timed out, keeping vector order"
                ),
            }
        }
        candidates.truncate(query.k);
        RetrievalResult {
            chunks: candidates,
            reranked,
        }
    }

    /// Evict least recently used snapshots beyond `max_snapshots`, never touching
    /// `current` or a repository that is building.
    async fn enforce_retention(&self, current: &RepositoryKey) {
        let limit = self.config.max_snapshots;
        if limit == 0 {
            return;
        }
        let keys = match self.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("cannot list persisted snapshots for retention: {e}");
                return;
            }
        };
        if keys.len() <= limit {
            return;
        }
        let mut ages = Vec::with_capacity(keys.len());
        for key in keys.iter().filter(|k| *k != current) {
            let slot = self.existing_slot(key);
            let in_memory = slot
                .as_ref()
                .filter(|s| s.is_loaded())
                .map(|s| s.last_used_ms.load(Ordering::Relaxed));
            let last_used = match in_memory {
                Some(ms) => ms,
                None => self.persisted_last_used(key).await,
            };
            ages.push((last_used, key.clone(), slot));
        }
        ages.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut excess = keys.len() - limit;
        for (last_used, key, slot) in ages {
            if excess == 0 {
                break;
            }
            let guard = match &slot {
                Some(s) => match s.build_lock.try_lock() {
                    Ok(guard) => Some(guard),
                    Err(_) => continue,
                },
                None => None,
            };
            match self.storage.remove(&key).await {
                Ok(_) => {
                    if let Some(s) = &slot {
                        s.reset();
                    }
                    excess -= 1;
                    tracing::warn!(repository = %key, last_used_ms = last_used, "evicted context index");
                }
                Err(e) => tracing::warn!(repository = %key, "cannot evict snapshot: {e}"),
            }
            drop(guard);
        }
    }

    async fn persisted_last_used(&self, key: &RepositoryKey) -> u64 {
        match self.storage.read_header(key).await {
            Ok(Some(line)) => codec::decode_header(&line).map_or(0, |h| h.last_used_ms),
            _ => 0,
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

/// Review-path operations for one repository.
#[derive(Debug)]
pub struct RepositoryContext<'a, P> {
    store: &'a ContextStore<P>,
    key: RepositoryKey,
}

impl<P: LlmProvider> RepositoryContext<'_, P> {
    #[must_use]
    pub fn key(&self) -> &RepositoryKey {
        &self.key
    }

    /// Make sure the index reflects `commit_ref` and covers `paths`.
    ///
    /// Only files whose content changed since the last build are re-embedded. Every
    /// failure degrades into the report; this never errors.
    pub async fn ensure_index(&self, commit_ref: &str, paths: &[String]) -> IndexReport {
        self.store.ensure_index(&self.key, commit_ref, paths).await
    }

    /// Up to `k` chunks relevant to the diff hunks of `file_path`. Empty when the file
    /// is not indexed or anything on the way fails.
    pub async fn retrieve_context(
        &self,
        file_path: &str,
        hunks: &[DiffHunk],
        k: usize,
    ) -> RetrievalResult {
        self.retrieve(&RetrievalQuery::new(file_path, hunks.to_vec(), k))
            .await
    }

    pub async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalResult {
        self.store.retrieve(&self.key, query).await
    }

    pub async fn status(&self) -> IndexStatus {
        self.store.index_status(&self.key).await
    }
}
