//! Language detection, tree-sitter grammar registry and path classification.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extensions treated as prose documentation.
pub const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "txt"];

/// Extensions worth indexing as code or configuration.
pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts", "c", "cc", "cpp", "h",
    "hpp", "go", "java", "rb", "rs", "php", "swift", "kt", "scala", "cs", "sql", "yaml", "yml",
    "json", "toml", "ini", "cfg",
];

/// Directory prefixes whose files are indexed regardless of extension.
pub const PREFERRED_DIRECTORIES: &[&str] = &[
    "docs/",
    "doc/",
    "documentation/",
    "src/",
    "lib/",
    "app/",
    "config/",
];

/// Language of a file, as far as chunking is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Markdown,
    Rst,
    #[serde(rename = "text")]
    PlainText,
}

impl Lang {
    /// Identifier used in persisted metadata and prompt fences.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Markdown => "markdown",
            Self::Rst => "rst",
            Self::PlainText => "text",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` for prose languages and
    /// when the corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Whether content is chunked along syntax boundaries.
    #[must_use]
    pub fn is_structured(self) -> bool {
        self.grammar().is_some()
    }

    #[must_use]
    pub fn is_documentation(self) -> bool {
        matches!(self, Self::Markdown | Self::Rst | Self::PlainText)
    }

    /// Top-level AST node kinds that represent named entities.
    /// Used by the chunker to decide chunk boundaries.
    #[must_use]
    pub fn entity_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "impl_item",
                "type_item",
                "const_item",
                "static_item",
                "macro_definition",
                "mod_item",
            ],
            Self::Python => &[
                "function_definition",
                "class_definition",
                "decorated_definition",
            ],
            Self::JavaScript | Self::TypeScript => &[
                "function_declaration",
                "class_declaration",
                "method_definition",
                "arrow_function",
                "export_statement",
                "lexical_declaration",
                "interface_declaration",
                "type_alias_declaration",
            ],
            Self::Go => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
                "const_declaration",
            ],
            Self::Markdown | Self::Rst | Self::PlainText => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn file_name_upper(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn is_readme_like(path: &Path) -> bool {
    let name = file_name_upper(path);
    name.starts_with("README") || name.starts_with("CHANGELOG") || name.contains("CONTRIBUTING")
}

/// Detect language from file extension, or from well-known documentation file names.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let by_ext = match extension(path).as_deref() {
        Some("rs") => Some(Lang::Rust),
        Some("py" | "pyi") => Some(Lang::Python),
        Some("js" | "jsx" | "mjs" | "cjs") => Some(Lang::JavaScript),
        Some("ts" | "tsx" | "mts" | "cts") => Some(Lang::TypeScript),
        Some("go") => Some(Lang::Go),
        Some("md" | "markdown") => Some(Lang::Markdown),
        Some("rst") => Some(Lang::Rst),
        Some("txt") => Some(Lang::PlainText),
        _ => None,
    };
    if by_ext.is_some() {
        return by_ext;
    }
    let has_code_ext = extension(path).is_some_and(|e| CODE_EXTENSIONS.contains(&e.as_str()));
    (is_readme_like(path) && !has_code_ext).then_some(Lang::PlainText)
}

/// Documentation files are indexed before code when the file budget is tight.
#[must_use]
pub fn is_document_path(path: &str) -> bool {
    let p = Path::new(path);
    is_readme_like(p) || extension(p).is_some_and(|e| DOC_EXTENSIONS.contains(&e.as_str()))
}

/// Whether a repository file is worth indexing at all.
#[must_use]
pub fn is_interesting_path(path: &str) -> bool {
    if is_document_path(path) {
        return true;
    }
    if PREFERRED_DIRECTORIES.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }
    extension(Path::new(path)).is_some_and(|e| CODE_EXTENSIONS.contains(&e.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_py() {
        assert_eq!(detect_language(Path::new("a.py")), Some(Lang::Python));
    }

    #[test]
    fn detect_language_ts_variants() {
        for ext in &["ts", "tsx", "mts", "cts"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::TypeScript),
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_docs() {
        assert_eq!(detect_language(Path::new("readme.md")), Some(Lang::Markdown));
        assert_eq!(detect_language(Path::new("docs/guide.RST")), Some(Lang::Rst));
        assert_eq!(detect_language(Path::new("README")), Some(Lang::PlainText));
        assert_eq!(detect_language(Path::new("CONTRIBUTING")), Some(Lang::PlainText));
    }

    #[test]
    fn readme_with_code_extension_is_not_prose() {
        assert_eq!(detect_language(Path::new("README.json")), None);
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn prose_languages_have_no_grammar() {
        assert!(Lang::Markdown.grammar().is_none());
        assert!(!Lang::Rst.is_structured());
        assert!(Lang::PlainText.is_documentation());
        assert!(Lang::PlainText.entity_node_kinds().is_empty());
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_is_structured() {
        assert!(Lang::Python.is_structured());
    }

    #[test]
    fn interesting_paths() {
        assert!(is_interesting_path("README.md"));
        assert!(is_interesting_path("docs/diagram.svg"));
        assert!(is_interesting_path("config/app.yaml"));
        assert!(is_interesting_path("pkg/handler.go"));
        assert!(!is_interesting_path("assets/logo.png"));
        assert!(!is_interesting_path("Makefile"));
    }

    #[test]
    fn document_paths() {
        assert!(is_document_path("CONTRIBUTING.md"));
        assert!(is_document_path("notes/todo.txt"));
        assert!(is_document_path("docs/README"));
        assert!(!is_document_path("src/lib.rs"));
    }

    #[test]
    fn lang_display_matches_id() {
        assert_eq!(Lang::JavaScript.to_string(), "javascript");
        assert_eq!(Lang::PlainText.to_string(), "text");
    }
}
