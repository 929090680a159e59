//! Line-based policies: paragraph blocks for documentation and sliding windows.

use crate::chunker::{ChunkerConfig, Piece, hard_split};
use crate::types::ChunkType;

const DOC_KIND: &str = "doc_block";
const WINDOW_KIND: &str = "window";

/// Consecutive runs of non-blank lines, 0-based inclusive.
fn paragraphs(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        match (line.trim().is_empty(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                out.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, lines.len() - 1));
    }
    out
}

/// Heading text when the paragraph opens with an ATX heading (`# Title`) or an
/// underlined heading (reStructuredText, setext Markdown).
fn heading_text(lines: &[&str], start: usize, end: usize) -> Option<String> {
    let first = lines[start].trim();
    if first.starts_with('#') {
        let title = first.trim_start_matches('#').trim();
        return (!title.is_empty()).then(|| title.to_owned());
    }
    if end > start {
        let underline = lines[start + 1].trim();
        if underline.len() >= 3
            && underline
                .chars()
                .all(|c| matches!(c, '=' | '-' | '~' | '^' | '*' | '+'))
        {
            return Some(first.to_owned());
        }
    }
    None
}

/// Merge paragraphs into blocks of at most `max_chunk_lines`.
///
/// A heading starts a new block once the current one is at least half full.
pub(crate) fn doc_blocks(lines: &[&str], config: &ChunkerConfig) -> Vec<Piece> {
    let max = config.max_chunk_lines;
    let mut out = Vec::new();
    let mut current: Option<Piece> = None;

    for (ps, pe) in paragraphs(lines) {
        let heading = heading_text(lines, ps, pe);

        if pe - ps >= max {
            if let Some(block) = current.take() {
                out.push(block);
            }
            hard_split(ps, pe, max, ChunkType::DocBlock, DOC_KIND, heading.as_deref(), &mut out);
            continue;
        }

        if let Some(block) = &current {
            let too_long = pe - block.start >= max;
            let section_break = heading.is_some() && block.len() * 2 >= max;
            if (too_long || section_break)
                && let Some(block) = current.take()
            {
                out.push(block);
            }
        }

        match current.as_mut() {
            Some(block) => {
                block.end = pe;
                if block.label.is_none() {
                    block.label = heading;
                }
            }
            None => current = Some(Piece::new(ps, pe, ChunkType::DocBlock, DOC_KIND, heading)),
        }
    }

    if let Some(block) = current {
        out.push(block);
    }
    out
}

/// Fixed windows of `window_lines` advancing by `window_lines - window_overlap`.
///
/// Each piece owns only the lines it adds over the previous window; the shared lines
/// are recorded as leading context.
pub(crate) fn windows(lines: &[&str], config: &ChunkerConfig) -> Vec<Piece> {
    let n = lines.len();
    let mut out = Vec::new();
    if n == 0 {
        return out;
    }
    let window = config.window_lines.max(1);
    let step = window - config.window_overlap.min(window - 1);

    let mut start = 0usize;
    let mut prev_end: Option<usize> = None;
    loop {
        let end = (start + window - 1).min(n - 1);
        let own_start = prev_end.map_or(start, |p| p + 1);
        if own_start <= end {
            let mut piece = Piece::new(own_start, end, ChunkType::GenericWindow, WINDOW_KIND, None);
            if own_start > start {
                piece.leading = Some((start, own_start - 1));
            }
            out.push(piece);
        }
        if end == n - 1 {
            break;
        }
        prev_end = Some(end);
        start += step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: usize, window: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_lines: max,
            min_chunk_lines: 1,
            window_lines: window,
            window_overlap: overlap,
        }
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let lines = ["a", "b", "", "  ", "c", "", "d"];
        assert_eq!(paragraphs(&lines), vec![(0, 1), (4, 4), (6, 6)]);
    }

    #[test]
    fn heading_detection() {
        assert_eq!(heading_text(&["## Setup"], 0, 0).as_deref(), Some("Setup"));
        assert_eq!(heading_text(&["Install", "======="], 0, 1).as_deref(), Some("Install"));
        assert_eq!(heading_text(&["plain", "text"], 0, 1), None);
        assert_eq!(heading_text(&["#"], 0, 0), None);
    }

    #[test]
    fn doc_blocks_break_at_heading_when_half_full() {
        let mut lines = vec!["# One"];
        lines.extend(std::iter::repeat_n("text", 6));
        lines.push("");
        lines.push("# Two");
        lines.push("more");
        let blocks = doc_blocks(&lines, &cfg(10, 40, 0));
        assert_eq!(blocks.len(), 2, "{blocks:?}");
        assert_eq!(blocks[1].label.as_deref(), Some("Two"));
        assert_eq!(blocks[1].start, 8);
    }

    #[test]
    fn doc_blocks_hard_split_long_paragraph() {
        let lines: Vec<&str> = std::iter::repeat_n("word", 25).collect();
        let blocks = doc_blocks(&lines, &cfg(10, 40, 0));
        let ranges: Vec<_> = blocks.iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(ranges, vec![(0, 9), (10, 19), (20, 24)]);
        assert!(blocks.iter().all(|b| b.chunk_type == ChunkType::DocBlock));
    }

    #[test]
    fn windows_own_disjoint_spans() {
        let lines: Vec<&str> = std::iter::repeat_n("x", 25).collect();
        let pieces = windows(&lines, &cfg(100, 10, 3));
        let ranges: Vec<_> = pieces.iter().map(|p| (p.start, p.end)).collect();
        assert_eq!(ranges, vec![(0, 9), (10, 16), (17, 23), (24, 24)]);
        assert_eq!(pieces[1].leading, Some((7, 9)));
        assert_eq!(pieces[3].leading, Some((21, 23)));
    }

    #[test]
    fn windows_short_file_is_one_window() {
        let lines = ["a", "b"];
        let pieces = windows(&lines, &cfg(100, 40, 10));
        assert_eq!(pieces.len(), 1);
        assert_eq!((pieces[0].start, pieces[0].end), (0, 1));
        assert!(pieces[0].leading.is_none());
    }
}
