//! Content-aware chunking: syntax units for code, paragraph blocks for prose,
//! sliding windows for everything else.

use std::path::Path;

use crate::languages::{Lang, detect_language};
use crate::types::ChunkType;
use crate::{ast, text};

/// Number of leading bytes inspected for NUL when sniffing binary content.
const BINARY_SNIFF_BYTES: usize = 8192;

/// Chunker configuration. All sizes are in lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Largest chunk produced by syntax or paragraph chunking (default: 100).
    pub max_chunk_lines: usize,
    /// Smaller syntax chunks merge with a neighbour when the result still fits (default: 3).
    pub min_chunk_lines: usize,
    /// Sliding window length for unstructured content (default: 40).
    pub window_lines: usize,
    /// Lines shared between consecutive windows (default: 10).
    pub window_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: 100,
            min_chunk_lines: 3,
            window_lines: 40,
            window_overlap: 10,
        }
    }
}

impl ChunkerConfig {
    /// Clamp values so every policy makes progress.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let max_chunk_lines = self.max_chunk_lines.max(1);
        let window_lines = self.window_lines.max(1);
        Self {
            max_chunk_lines,
            min_chunk_lines: self.min_chunk_lines.min(max_chunk_lines),
            window_lines,
            window_overlap: self.window_overlap.min(window_lines - 1),
        }
    }
}

/// One chunk of a file, before it is given an identity and an embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub chunk_type: ChunkType,
    pub kind: String,
    pub label: Option<String>,
    pub content: String,
    /// Lines preceding the span that are embedded with it but belong to the previous window.
    pub leading_context: Option<String>,
}

/// 0-based inclusive line range produced by a chunking policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Piece {
    pub start: usize,
    pub end: usize,
    pub chunk_type: ChunkType,
    pub kind: String,
    pub label: Option<String>,
    pub leading: Option<(usize, usize)>,
}

impl Piece {
    pub(crate) fn new(
        start: usize,
        end: usize,
        chunk_type: ChunkType,
        kind: impl Into<String>,
        label: Option<String>,
    ) -> Self {
        Self {
            start,
            end,
            chunk_type,
            kind: kind.into(),
            label,
            leading: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end + 1 - self.start
    }
}

/// Cut `start..=end` into consecutive pieces of at most `max` lines.
pub(crate) fn hard_split(
    start: usize,
    end: usize,
    max: usize,
    chunk_type: ChunkType,
    kind: &str,
    label: Option<&str>,
    out: &mut Vec<Piece>,
) {
    let mut s = start;
    while s <= end {
        let e = (s + max - 1).min(end);
        out.push(Piece::new(s, e, chunk_type, kind, label.map(str::to_owned)));
        s = e + 1;
    }
}

/// Stateless chunking service. Output is a pure function of content and configuration.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk raw file bytes. Binary or non-UTF-8 content yields no chunks.
    #[must_use]
    pub fn chunk_bytes(
        &self,
        file_path: &str,
        bytes: &[u8],
        language_hint: Option<Lang>,
    ) -> Vec<ChunkSpan> {
        if looks_binary(bytes) {
            return Vec::new();
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => self.chunk(file_path, text, language_hint),
            Err(_) => Vec::new(),
        }
    }

    /// Chunk text content.
    ///
    /// Spans come back ordered by `start_line` and never overlap. Syntax-aware chunking
    /// falls back to windows when the grammar is missing or the parse has errors.
    #[must_use]
    pub fn chunk(
        &self,
        file_path: &str,
        content: &str,
        language_hint: Option<Lang>,
    ) -> Vec<ChunkSpan> {
        if content.contains('\0') || content.trim().is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = content.lines().collect();
        let lang = language_hint.or_else(|| detect_language(Path::new(file_path)));

        let pieces = match lang {
            Some(l) if l.is_documentation() => text::doc_blocks(&lines, &self.config),
            Some(l) if l.is_structured() => {
                match ast::code_units(content, lines.len(), l, &self.config) {
                    Some(pieces) if !pieces.is_empty() => pieces,
                    _ => {
                        tracing::debug!(file = file_path, lang = %l, "syntax chunking failed, using windows");
                        text::windows(&lines, &self.config)
                    }
                }
            }
            _ => text::windows(&lines, &self.config),
        };

        finalize(pieces, &lines)
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

fn join_lines(lines: &[&str], start: usize, end: usize) -> String {
    lines[start..=end].join("\n")
}

fn finalize(pieces: Vec<Piece>, lines: &[&str]) -> Vec<ChunkSpan> {
    let mut out: Vec<ChunkSpan> = Vec::with_capacity(pieces.len());
    let mut next_free = 0usize;
    for piece in pieces {
        if lines.is_empty() {
            break;
        }
        let end = piece.end.min(lines.len() - 1);
        let start = piece.start.max(next_free);
        if start > end {
            continue;
        }
        let content = join_lines(lines, start, end);
        if content.trim().is_empty() {
            continue;
        }
        let leading_context = piece
            .leading
            .filter(|(s, e)| s <= e && *e < lines.len())
            .map(|(s, e)| join_lines(lines, s, e))
            .filter(|t| !t.trim().is_empty());
        next_free = end + 1;
        out.push(ChunkSpan {
            start_line: start + 1,
            end_line: end + 1,
            chunk_type: piece.chunk_type,
            kind: piece.kind,
            label: piece.label,
            content,
            leading_context,
        });
    }
    out
}
