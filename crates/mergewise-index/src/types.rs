//! Core data model: repository keys, chunks and scored retrieval hits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::languages::Lang;

/// Repository namespace, `owner/name`.
///
/// Owners follow hosting rules (ASCII alphanumerics, `-` and `.`), names may also
/// contain `_`. The restriction keeps [`storage_name`](Self::storage_name) reversible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryKey {
    owner: String,
    name: String,
}

const STORAGE_SEPARATOR: &str = "__";

fn valid_part(part: &str, allow_underscore: bool) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && part.chars().all(|c| {
            c.is_ascii_alphanumeric() || c == '-' || c == '.' || (allow_underscore && c == '_')
        })
}

impl RepositoryKey {
    /// # Errors
    ///
    /// Returns `IndexError::InvalidRepositoryKey` if either part is empty or contains
    /// characters outside the allowed set.
    pub fn new(owner: &str, name: &str) -> Result<Self, IndexError> {
        if !valid_part(owner, false) || !valid_part(name, true) {
            return Err(IndexError::InvalidRepositoryKey(format!("{owner}/{name}")));
        }
        Ok(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flat, filesystem-safe form used to address the persisted snapshot.
    #[must_use]
    pub fn storage_name(&self) -> String {
        format!("{}{STORAGE_SEPARATOR}{}", self.owner, self.name)
    }

    /// Inverse of [`storage_name`](Self::storage_name).
    ///
    /// # Errors
    ///
    /// Returns `IndexError::InvalidRepositoryKey` for names not produced by `storage_name`.
    pub fn from_storage_name(s: &str) -> Result<Self, IndexError> {
        let (owner, name) = s
            .split_once(STORAGE_SEPARATOR)
            .ok_or_else(|| IndexError::InvalidRepositoryKey(s.to_owned()))?;
        Self::new(owner, name)
    }
}

impl FromStr for RepositoryKey {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| IndexError::InvalidRepositoryKey(s.to_owned()))?;
        if name.contains('/') {
            return Err(IndexError::InvalidRepositoryKey(s.to_owned()));
        }
        Self::new(owner, name)
    }
}

impl TryFrom<String> for RepositoryKey {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepositoryKey> for String {
    fn from(key: RepositoryKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// How a chunk was produced, which decides how it is rendered into prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    CodeUnit,
    DocBlock,
    GenericWindow,
}

impl ChunkType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CodeUnit => "code_unit",
            Self::DocBlock => "doc_block",
            Self::GenericWindow => "generic_window",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, indexed span of one file. The embedding lives in the snapshot's
/// vector index under the same `document_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
    /// Syntax node kind or block kind the span came from.
    pub kind: String,
    /// Entity name, scope chain or heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Lang>,
    pub content: String,
}

/// Stable chunk identifier: blake3 over repository, path, file content hash and span.
///
/// The file content hash stands in for the commit reference, so chunks of files that
/// did not change between commits keep their identifiers.
#[must_use]
pub fn document_id(
    repository: &RepositoryKey,
    file_path: &str,
    content_hash: &str,
    start_line: usize,
    end_line: usize,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(repository.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(content_hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(end_line.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Hex blake3 digest of raw bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// Score assigned by the reranker, when one ran.
    pub rerank_score: Option<f32>,
}

impl ScoredChunk {
    #[must_use]
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            score,
            rerank_score: None,
        }
    }

    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repository_key() {
        let key: RepositoryKey = "acme/widgets".parse().unwrap();
        assert_eq!(key.owner(), "acme");
        assert_eq!(key.name(), "widgets");
        assert_eq!(key.to_string(), "acme/widgets");
    }

    #[test]
    fn reject_malformed_keys() {
        for bad in ["", "acme", "/widgets", "acme/", "a/b/c", "../x", "acme/..", "ac me/x"] {
            assert!(bad.parse::<RepositoryKey>().is_err(), "accepted {bad:?}");
        }
        assert!("my_org/repo".parse::<RepositoryKey>().is_err());
    }

    #[test]
    fn storage_name_round_trips_with_underscores_in_name() {
        let key: RepositoryKey = "acme/__private_repo".parse().unwrap();
        let flat = key.storage_name();
        assert_eq!(flat, "acme____private_repo");
        assert_eq!(RepositoryKey::from_storage_name(&flat).unwrap(), key);
    }

    #[test]
    fn repository_key_serde_as_string() {
        let key: RepositoryKey = "acme/widgets".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"acme/widgets\"");
        let back: RepositoryKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<RepositoryKey>("\"nope\"").is_err());
    }

    #[test]
    fn document_id_depends_on_every_component() {
        let key: RepositoryKey = "acme/widgets".parse().unwrap();
        let base = document_id(&key, "a.py", "h1", 1, 10);
        assert_eq!(base, document_id(&key, "a.py", "h1", 1, 10));
        assert_ne!(base, document_id(&key, "b.py", "h1", 1, 10));
        assert_ne!(base, document_id(&key, "a.py", "h2", 1, 10));
        assert_ne!(base, document_id(&key, "a.py", "h1", 1, 11));
        assert_ne!(base, document_id(&key, "a.py", "h1", 11, 1));
        let other: RepositoryKey = "acme/gadgets".parse().unwrap();
        assert_ne!(base, document_id(&other, "a.py", "h1", 1, 10));
    }

    #[test]
    fn chunk_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ChunkType::GenericWindow).unwrap(),
            "\"generic_window\""
        );
        assert_eq!(ChunkType::DocBlock.to_string(), "doc_block");
    }
}
