//! Syntax-aware chunking via tree-sitter with greedy sibling batching.

use tree_sitter::{Node, Parser};

use crate::chunker::{ChunkerConfig, Piece, hard_split};
use crate::languages::Lang;
use crate::types::ChunkType;

/// Kind given to runs of top-level statements that are not named entities.
const MODULE_KIND: &str = "module";

struct Ctx<'a> {
    source: &'a str,
    lang: Lang,
    max: usize,
    last_line: usize,
}

/// Batch of consecutive siblings being grown under the size limit.
struct Batch {
    start: usize,
    end: usize,
    count: usize,
    kind: String,
    /// Entity name of the first sibling, used when the batch holds only that sibling.
    name: Option<String>,
    comments_only: bool,
}

/// Chunk parsed source into code units.
///
/// Returns `None` when no grammar is available or the parse contains errors, so the
/// caller can fall back to window chunking.
pub(crate) fn code_units(
    source: &str,
    line_count: usize,
    lang: Lang,
    config: &ChunkerConfig,
) -> Option<Vec<Piece>> {
    if line_count == 0 {
        return Some(Vec::new());
    }
    let grammar = lang.grammar()?;
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let ctx = Ctx {
        source,
        lang,
        max: config.max_chunk_lines,
        last_line: line_count - 1,
    };
    let mut out = Vec::new();
    ctx.top_level(&root, &mut out);
    merge_small(&mut out, config);
    Some(out)
}

/// 0-based inclusive row span. A node ending at column 0 of a later row does not own that row.
fn rows(node: &Node) -> (usize, usize) {
    let start = node.start_position().row;
    let end_pos = node.end_position();
    let end = if end_pos.column == 0 && end_pos.row > start {
        end_pos.row - 1
    } else {
        end_pos.row
    };
    (start, end)
}

fn named_children<'t>(node: &Node<'t>) -> Vec<Node<'t>> {
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(|i| node.named_child(i)).collect()
}

fn is_comment(node: &Node) -> bool {
    node.kind().contains("comment")
}

fn extract_entity_name(node: &Node, source: &str) -> Option<String> {
    // tree-sitter-rust: impl_item uses "type" field, most others use "name"
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .and_then(|n| source.get(n.byte_range()))
        .map(str::to_owned)
}

fn extend_scope(parent_scope: Option<&str>, name: Option<String>) -> Option<String> {
    match (parent_scope, name) {
        (Some(parent), Some(name)) => Some(format!("{parent} > {name}")),
        (None, name) => name,
        (Some(parent), None) => Some(parent.to_owned()),
    }
}

impl Ctx<'_> {
    fn clamp(&self, (start, end): (usize, usize)) -> (usize, usize) {
        (start.min(self.last_line), end.min(self.last_line))
    }

    fn is_entity(&self, node: &Node) -> bool {
        self.lang.entity_node_kinds().contains(&node.kind())
    }

    fn top_level(&self, root: &Node, out: &mut Vec<Piece>) {
        let mut cursor = 0usize;
        let mut batch: Option<Batch> = None;

        for child in named_children(root) {
            let (cs, ce) = self.clamp(rows(&child));
            let cs = cs.max(cursor);
            if cs > ce {
                continue;
            }
            let size = ce - cs + 1;

            if self.is_entity(&child) || size > self.max {
                let mut start = cs;
                // Leading comments stick to the entity they document.
                let attach = batch
                    .as_ref()
                    .is_some_and(|b| b.comments_only && b.end + 1 >= cs && ce - b.start < self.max);
                if attach && let Some(b) = batch.take() {
                    start = b.start;
                }
                if let Some(b) = batch.take() {
                    out.push(batch_piece(b, None));
                }
                let name = extract_entity_name(&child, self.source);
                if ce - start < self.max {
                    out.push(Piece::new(start, ce, ChunkType::CodeUnit, child.kind(), name));
                } else {
                    self.split(&child, start, name.as_deref(), out);
                }
                cursor = ce + 1;
                continue;
            }

            if batch.as_ref().is_some_and(|b| ce - b.start >= self.max)
                && let Some(b) = batch.take()
            {
                out.push(batch_piece(b, None));
            }
            let comment = is_comment(&child);
            let b = batch.get_or_insert_with(|| Batch {
                start: cs,
                end: ce,
                count: 0,
                kind: MODULE_KIND.to_owned(),
                name: None,
                comments_only: true,
            });
            b.end = ce;
            b.count += 1;
            b.comments_only &= comment;
            cursor = ce + 1;
        }

        if let Some(b) = batch {
            out.push(batch_piece(b, None));
        }
    }

    /// Split an oversized node over its named children, starting at `lead_start` so that
    /// header lines before the first child stay with the first part.
    fn split(&self, node: &Node, lead_start: usize, scope: Option<&str>, out: &mut Vec<Piece>) {
        let (_, ne) = self.clamp(rows(node));
        let children = named_children(node);
        if children.is_empty() {
            hard_split(lead_start, ne, self.max, ChunkType::CodeUnit, node.kind(), scope, out);
            return;
        }

        let mut cursor = lead_start;
        let mut batch: Option<Batch> = None;

        for child in children {
            let (_, ce) = self.clamp(rows(&child));
            let ce = ce.min(ne);
            if ce < cursor {
                continue;
            }
            let seg_start = batch.as_ref().map_or(cursor, |b| b.start);
            if ce - seg_start < self.max {
                let b = batch.get_or_insert_with(|| Batch {
                    start: seg_start,
                    end: ce,
                    count: 0,
                    kind: child.kind().to_owned(),
                    name: extract_entity_name(&child, self.source),
                    comments_only: false,
                });
                b.end = ce;
                b.count += 1;
                cursor = ce + 1;
                continue;
            }

            if let Some(b) = batch.take() {
                cursor = b.end + 1;
                out.push(batch_piece(b, scope));
            }
            let name = extract_entity_name(&child, self.source);
            if ce - cursor < self.max {
                batch = Some(Batch {
                    start: cursor,
                    end: ce,
                    count: 1,
                    kind: child.kind().to_owned(),
                    name,
                    comments_only: false,
                });
            } else {
                let child_scope = extend_scope(scope, name);
                self.split(&child, cursor, child_scope.as_deref(), out);
            }
            cursor = ce + 1;
        }

        // Trailing lines such as a closing brace.
        if cursor <= ne {
            let fits = batch.as_ref().is_some_and(|b| ne - b.start < self.max);
            if fits {
                if let Some(b) = batch.as_mut() {
                    b.end = ne;
                }
            } else {
                if let Some(b) = batch.take() {
                    out.push(batch_piece(b, scope));
                }
                hard_split(cursor, ne, self.max, ChunkType::CodeUnit, node.kind(), scope, out);
            }
        }
        if let Some(b) = batch {
            out.push(batch_piece(b, scope));
        }
    }
}

fn batch_piece(b: Batch, scope: Option<&str>) -> Piece {
    let (kind, label) = if b.count > 1 {
        let kind = if b.kind == MODULE_KIND {
            b.kind
        } else {
            format!("{}x{}", b.kind, b.count)
        };
        (kind, scope.map(str::to_owned))
    } else {
        (b.kind, extend_scope(scope, b.name))
    };
    Piece::new(b.start, b.end, ChunkType::CodeUnit, kind, label)
}

/// Merge pieces shorter than `min_chunk_lines` into a neighbour when the merged span
/// still fits under `max_chunk_lines`. Prefers the following piece.
fn merge_small(pieces: &mut Vec<Piece>, config: &ChunkerConfig) {
    let max = config.max_chunk_lines;
    let mut i = 0;
    while i < pieces.len() {
        if pieces.len() < 2 || pieces[i].len() >= config.min_chunk_lines {
            i += 1;
            continue;
        }
        if i + 1 < pieces.len() && pieces[i + 1].end - pieces[i].start < max {
            let next = pieces.remove(i + 1);
            absorb(&mut pieces[i], next);
        } else if i > 0 && pieces[i].end - pieces[i - 1].start < max {
            let cur = pieces.remove(i);
            absorb(&mut pieces[i - 1], cur);
        } else {
            i += 1;
        }
    }
}

/// Extend `into` over `other`, keeping the identity of the larger of the two.
fn absorb(into: &mut Piece, other: Piece) {
    let keep_other = other.len() >= into.len() || into.label.is_none();
    into.start = into.start.min(other.start);
    into.end = into.end.max(other.end);
    if keep_other && other.label.is_some() {
        into.kind = other.kind;
        into.label = other.label;
    }
}
