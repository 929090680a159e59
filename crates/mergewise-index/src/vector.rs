//! Exact cosine-similarity index over chunk embeddings.
//!
//! Search is a flat scan, which is exact and fast enough for per-repository corpora
//! of a few thousand chunks. Ties are broken by ascending `document_id` so results are
//! reproducible across runs and processes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    vector: Vec<f32>,
    norm: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dimension: Option<usize>,
    entries: BTreeMap<String, Entry>,
}

/// A search hit: document id and cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub document_id: String,
    pub score: f32,
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Descending score, then ascending id.
fn rank(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.document_id.cmp(&b.document_id))
}

impl VectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index that only accepts vectors of `dimension` components.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            entries: BTreeMap::new(),
        }
    }

    /// Fixed by the first insert unless set up front.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, document_id: &str) -> bool {
        self.entries.contains_key(document_id)
    }

    #[must_use]
    pub fn get(&self, document_id: &str) -> Option<&[f32]> {
        self.entries.get(document_id).map(|e| e.vector.as_slice())
    }

    /// Document ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries
            .iter()
            .map(|(id, e)| (id.as_str(), e.vector.as_slice()))
    }

    /// Check that `vector` could be inserted without modifying the index.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` or `NonFiniteVector`.
    pub fn validate(&self, document_id: &str, vector: &[f32]) -> Result<()> {
        if let Some(expected) = self.dimension
            && expected != vector.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if vector.is_empty() || vector.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteVector(document_id.to_owned()));
        }
        Ok(())
    }

    /// Insert or replace the vector for `document_id`. Replacement is a single map
    /// write, so the old vector is never visible after this returns.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the vector length differs from the index dimension,
    /// or `NonFiniteVector` for empty or NaN/infinite vectors. The index is unchanged on error.
    pub fn upsert(&mut self, document_id: &str, vector: Vec<f32>) -> Result<()> {
        self.validate(document_id, &vector)?;
        self.dimension.get_or_insert(vector.len());
        let norm = norm(&vector);
        self.entries
            .insert(document_id.to_owned(), Entry { vector, norm });
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, document_id: &str) -> bool {
        self.entries.remove(document_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dimension = None;
    }

    /// Up to `k` nearest entries, highest score first, ties by ascending id.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the query length differs from the index dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension
            && expected != query.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
        let q_norm = norm(query);

        let mut hits: Vec<Hit> = self
            .entries
            .iter()
            .map(|(id, e)| Hit {
                document_id: id.clone(),
                score: cosine(query, q_norm, &e.vector, e.norm),
            })
            .collect();

        if hits.len() > k {
            hits.select_nth_unstable_by(k - 1, rank);
            hits.truncate(k);
        }
        hits.sort_by(rank);
        Ok(hits)
    }
}
