//! Text built around chunks: what gets embedded, and what a reviewer prompt shows.

use std::fmt::Write as _;

use crate::chunker::ChunkSpan;
use crate::languages::Lang;
use crate::types::{Chunk, ChunkType, ScoredChunk};

/// Text sent to the embedding provider for one span.
///
/// Path, scope and language lines help conceptual queries land on the right chunk.
/// Overlap lines of a window are embedded with it but are not part of its span.
#[must_use]
pub fn embedding_text(span: &ChunkSpan, file_path: &str, lang: Option<Lang>) -> String {
    let extra = span.leading_context.as_ref().map_or(0, String::len);
    let mut text = String::with_capacity(span.content.len() + extra + 128);

    text.push_str("# ");
    text.push_str(file_path);
    text.push('\n');

    if let Some(label) = span.label.as_deref().filter(|l| !l.is_empty()) {
        text.push_str("# Scope: ");
        text.push_str(label);
        text.push('\n');
    }

    if let Some(lang) = lang {
        text.push_str("# Language: ");
        text.push_str(lang.id());
        text.push('\n');
    }

    if let Some(leading) = span.leading_context.as_deref() {
        text.push_str(leading);
        text.push('\n');
    }

    text.push_str(&span.content);
    text
}

fn location(chunk: &Chunk) -> String {
    if chunk.end_line == chunk.start_line {
        format!("{}:{}", chunk.file_path, chunk.start_line)
    } else {
        format!("{}:{}-{}", chunk.file_path, chunk.start_line, chunk.end_line)
    }
}

/// One-line summary for listings: `path :: label (lines a-b)`.
#[must_use]
pub fn display_header(chunk: &Chunk) -> String {
    let name = chunk.label.as_deref().unwrap_or(&chunk.kind);
    format!(
        "{} :: {name} (lines {}-{})",
        chunk.file_path, chunk.start_line, chunk.end_line
    )
}

/// Context block for a review prompt.
///
/// Code units are fenced with their language, documentation is block-quoted and
/// generic windows are left as plain text.
#[must_use]
pub fn render_context_block(scored: &ScoredChunk) -> String {
    let chunk = &scored.chunk;
    let mut out = format!("[Source: {}]", location(chunk));
    if let Some(label) = chunk.label.as_deref().filter(|l| !l.is_empty()) {
        let _ = write!(out, " ({label})");
    }
    out.push('\n');
    let body = chunk.content.trim_end_matches('\n');
    match chunk.chunk_type {
        ChunkType::CodeUnit => {
            let tag = chunk.language.map_or("", Lang::id);
            let _ = write!(out, "```{tag}\n{body}\n```");
        }
        ChunkType::DocBlock => {
            let quoted: Vec<String> = body
                .lines()
                .map(|l| if l.is_empty() { ">".to_owned() } else { format!("> {l}") })
                .collect();
            out.push_str(&quoted.join("\n"));
        }
        ChunkType::GenericWindow => out.push_str(body),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> ChunkSpan {
        ChunkSpan {
            start_line: 10,
            end_line: 12,
            chunk_type: ChunkType::CodeUnit,
            kind: "function_item".into(),
            label: Some("Server > run".into()),
            content: "fn run() {\n    loop {}\n}".into(),
            leading_context: None,
        }
    }

    fn scored(chunk_type: ChunkType, content: &str, lang: Option<Lang>) -> ScoredChunk {
        ScoredChunk::new(
            Chunk {
                document_id: "d".into(),
                file_path: "src/server.rs".into(),
                start_line: 10,
                end_line: 12,
                chunk_type,
                kind: "function_item".into(),
                label: Some("run".into()),
                language: lang,
                content: content.into(),
            },
            0.5,
        )
    }

    #[test]
    fn embedding_text_has_path_scope_language() {
        let text = embedding_text(&span(), "src/server.rs", Some(Lang::Rust));
        assert_eq!(
            text,
            "# src/server.rs\n# Scope: Server > run\n# Language: rust\nfn run() {\n    loop {}\n}"
        );
    }

    #[test]
    fn embedding_text_includes_window_overlap() {
        let mut s = span();
        s.label = None;
        s.leading_context = Some("previous line".into());
        let text = embedding_text(&s, "notes.cfg", None);
        assert_eq!(text, "# notes.cfg\nprevious line\nfn run() {\n    loop {}\n}");
    }

    #[test]
    fn code_unit_is_fenced() {
        let block = render_context_block(&scored(ChunkType::CodeUnit, "fn run() {}\n", Some(Lang::Rust)));
        assert_eq!(block, "[Source: src/server.rs:10-12] (run)\n```rust\nfn run() {}\n```");
    }

    #[test]
    fn doc_block_is_quoted() {
        let block = render_context_block(&scored(ChunkType::DocBlock, "# Title\n\nBody", Some(Lang::Markdown)));
        assert_eq!(block, "[Source: src/server.rs:10-12] (run)\n> # Title\n>\n> Body");
    }

    #[test]
    fn window_is_plain() {
        let mut s = scored(ChunkType::GenericWindow, "key = value", None);
        s.chunk.label = None;
        s.chunk.end_line = 10;
        assert_eq!(render_context_block(&s), "[Source: src/server.rs:10]\nkey = value");
    }

    #[test]
    fn display_header_falls_back_to_kind() {
        let mut s = scored(ChunkType::CodeUnit, "", None);
        assert_eq!(display_header(&s.chunk), "src/server.rs :: run (lines 10-12)");
        s.chunk.label = None;
        assert_eq!(display_header(&s.chunk), "src/server.rs :: function_item (lines 10-12)");
    }
}
