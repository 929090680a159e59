//! Turning diff hunks into retrieval query texts.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

impl LineKind {
    fn prefix(self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
            Self::Context => ' ',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
}

impl DiffLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// One `@@ -old_start,old_lines +new_start,new_lines @@` section of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// A hunk that adds lines `start..=end` of the new file, taking their text from
    /// the whole file `content`. Lines past the end of the file are left blank.
    #[must_use]
    pub fn for_new_lines(start: usize, end: usize, content: &str) -> Self {
        let start = start.max(1);
        let count = end.max(start) + 1 - start;
        let mut texts = content.lines().skip(start - 1);
        let lines = (0..count)
            .map(|_| DiffLine::new(LineKind::Added, texts.next().unwrap_or_default()))
            .collect();
        Self {
            old_start: start,
            old_lines: 0,
            new_start: start,
            new_lines: count,
            lines,
        }
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|l| l.kind != LineKind::Context)
    }

    /// Last line of the new-file range, inclusive.
    #[must_use]
    pub fn new_end(&self) -> usize {
        (self.new_start + self.new_lines).saturating_sub(1).max(self.new_start)
    }
}

fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

fn parse_hunk_header(line: &str) -> Option<DiffHunk> {
    let rest = line.strip_prefix("@@ ")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(' ')?;
    let (old_start, old_lines) = parse_range(old.strip_prefix('-')?)?;
    let (new_start, new_lines) = parse_range(new.strip_prefix('+')?)?;
    Some(DiffHunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines: Vec::new(),
    })
}

fn is_complete(hunk: &DiffHunk) -> bool {
    let old = hunk.lines.iter().filter(|l| l.kind != LineKind::Added).count();
    let new = hunk.lines.iter().filter(|l| l.kind != LineKind::Removed).count();
    old >= hunk.old_lines && new >= hunk.new_lines
}

/// Parse the hunks of a unified diff.
///
/// Lines outside a hunk (file headers, `diff --git`, index lines) and
/// `\ No newline at end of file` markers are skipped. A hunk ends once its header's
/// line counts are used up.
#[must_use]
pub fn parse_unified_diff(patch: &str) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<DiffHunk> = None;
    for line in patch.lines() {
        if line.starts_with("@@") {
            hunks.extend(current.take());
            current = parse_hunk_header(line);
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };
        if line.starts_with('\\') {
            continue;
        }
        if is_complete(hunk) {
            hunks.extend(current.take());
            continue;
        }
        let line = match line.chars().next() {
            Some('+') => DiffLine::new(LineKind::Added, &line[1..]),
            Some('-') => DiffLine::new(LineKind::Removed, &line[1..]),
            Some(' ') => DiffLine::new(LineKind::Context, &line[1..]),
            None => DiffLine::new(LineKind::Context, ""),
            Some(_) => {
                hunks.extend(current.take());
                continue;
            }
        };
        hunk.lines.push(line);
    }
    hunks.extend(current);
    hunks
}

/// What a reviewer asks the context store for one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    pub file_path: String,
    pub hunks: Vec<DiffHunk>,
    pub k: usize,
    pub title: Option<String>,
}

impl RetrievalQuery {
    pub fn new(file_path: impl Into<String>, hunks: Vec<DiffHunk>, k: usize) -> Self {
        Self {
            file_path: file_path.into(),
            hunks,
            k,
            title: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Unchanged lines kept before and after the changed region of a hunk.
    pub context_lines: usize,
    /// Upper bound on the characters of one query text.
    pub max_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            context_lines: 3,
            max_chars: 4000,
        }
    }
}

fn trim_to(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn snippet(hunk: &DiffHunk, context_lines: usize) -> Option<String> {
    let first = hunk.lines.iter().position(|l| l.kind != LineKind::Context)?;
    let last = hunk.lines.iter().rposition(|l| l.kind != LineKind::Context)?;
    let from = first.saturating_sub(context_lines);
    let to = (last + context_lines).min(hunk.lines.len() - 1);
    let mut out = String::new();
    for line in &hunk.lines[from..=to] {
        let _ = writeln!(out, "{}{}", line.kind.prefix(), line.text);
    }
    Some(out)
}

/// One query text per hunk that changes something.
#[must_use]
pub fn query_texts(query: &RetrievalQuery, config: &QueryConfig) -> Vec<String> {
    query
        .hunks
        .iter()
        .filter_map(|hunk| snippet(hunk, config.context_lines))
        .map(|diff| {
            let mut text = String::new();
            if let Some(title) = &query.title {
                let _ = writeln!(text, "PR Title: {title}");
            }
            let _ = write!(text, "File: {}\nDiff snippet:\n{diff}", query.file_path);
            trim_to(&text, config.max_chars)
        })
        .collect()
}
