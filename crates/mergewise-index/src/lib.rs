//! Repository context indexing and retrieval.
//!
//! Files of a repository tree are cut into syntax-aware chunks, embedded in batches and
//! kept in a per-repository snapshot with an exact vector index. Snapshots persist
//! between runs and are rebuilt incrementally as commits change. Retrieval turns the
//! diff hunks of a changed file into queries, merges the nearest chunks and optionally
//! reranks them before they are rendered into a review prompt.

pub(crate) mod ast;
pub mod chunker;
pub mod codec;
pub mod context;
pub mod embedder;
pub mod error;
pub mod languages;
pub mod plan;
pub mod query;
pub mod rerank;
pub mod snapshot;
pub mod source;
pub mod storage;
pub mod store;
pub(crate) mod text;
pub mod types;
pub mod vector;

pub use error::{IndexError, Result};
pub use query::{DiffHunk, RetrievalQuery, parse_unified_diff};
pub use snapshot::IndexSnapshot;
pub use store::{
    ContextStore, ContextStoreConfig, IndexReport, IndexStatus, RepositoryContext,
    RetrievalConfig, RetrievalResult,
};
pub use types::{Chunk, ChunkType, RepositoryKey, ScoredChunk};
