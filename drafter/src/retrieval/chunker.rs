//! Splits source files into retrievable chunks.
//!
//! A new chunk starts at every recognised declaration line (`fn`, `struct`,
//! `class`, `func`, `def`, ...) and no chunk grows past `MAX_CHUNK_LINES`.
//! Files short enough to fit in one chunk with no declaration become a single
//! `file` chunk.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MAX_CHUNK_LINES: usize = 40;

static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:pub(?:\([^)]*\))?|export|public|private|internal|open|static|final|abstract|async|default)\s+)*(fn|func|def|function|struct|enum|trait|class|interface|protocol|extension|impl|mod|module|type)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("declaration regex is valid")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    File,
    Function,
    Type,
    Module,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Type => "type",
            Self::Module => "module",
            Self::Block => "block",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "file" => Self::File,
            "function" => Self::Function,
            "type" => Self::Type,
            "module" => Self::Module,
            _ => Self::Block,
        }
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "fn" | "func" | "def" | "function" => Self::Function,
            "mod" | "module" | "extension" | "impl" => Self::Module,
            _ => Self::Type,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub kind: ChunkKind,
    pub symbol_name: Option<String>,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

fn declaration(line: &str) -> Option<(ChunkKind, String)> {
    DECLARATION
        .captures(line)
        .map(|caps| (ChunkKind::from_keyword(&caps[1]), caps[2].to_string()))
}

pub fn chunk_source(content: &str) -> Vec<CodeChunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return Vec::new();
    }

    let has_declaration = lines.iter().any(|l| declaration(l).is_some());
    if !has_declaration && lines.len() <= MAX_CHUNK_LINES {
        return vec![CodeChunk {
            kind: ChunkKind::File,
            symbol_name: None,
            start_line: 1,
            end_line: lines.len(),
            content: lines.join("\n"),
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut current: Option<(ChunkKind, String)> = None;

    for (idx, line) in lines.iter().enumerate() {
        let decl = declaration(line);
        let too_long = idx - start >= MAX_CHUNK_LINES;
        if idx > start && (decl.is_some() || too_long) {
            push_chunk(&mut chunks, &lines, start, idx, current.take());
            start = idx;
        }
        if let Some(found) = decl {
            current = Some(found);
        }
    }
    push_chunk(&mut chunks, &lines, start, lines.len(), current);
    chunks
}

fn push_chunk(
    chunks: &mut Vec<CodeChunk>,
    lines: &[&str],
    start: usize,
    end: usize,
    decl: Option<(ChunkKind, String)>,
) {
    let body = lines[start..end].join("\n");
    if body.trim().is_empty() {
        return;
    }
    let (kind, symbol_name) = match decl {
        Some((kind, name)) => (kind, Some(name)),
        None => (ChunkKind::Block, None),
    };
    chunks.push(CodeChunk {
        kind,
        symbol_name,
        start_line: start + 1,
        end_line: end,
        content: body,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_plain_file_is_one_chunk() {
        let chunks = chunk_source("# Shop\n\nA storefront.\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::File);
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn test_splits_on_declarations() {
        let source = "use std::fmt;\n\npub struct Cart {\n    items: Vec<u32>,\n}\n\npub async fn checkout(cart: Cart) {\n    todo!()\n}\n";
        let chunks = chunk_source(source);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].kind, ChunkKind::Block);
        assert_eq!(chunks[1].kind, ChunkKind::Type);
        assert_eq!(chunks[1].symbol_name.as_deref(), Some("Cart"));
        assert_eq!(chunks[2].kind, ChunkKind::Function);
        assert_eq!(chunks[2].symbol_name.as_deref(), Some("checkout"));
        assert_eq!(chunks[2].start_line, 7);
    }

    #[test]
    fn test_long_blocks_are_capped() {
        let source = (0..100).map(|i| format!("let x{i} = {i};")).collect::<Vec<_>>().join("\n");
        let chunks = chunk_source(&source);
        assert_eq!(chunks.len(), 3);
        assert!(chunks
            .iter()
            .all(|c| c.end_line - c.start_line + 1 <= MAX_CHUNK_LINES));
    }

    #[test]
    fn test_python_and_swift_declarations() {
        assert_eq!(
            declaration("    def handle_order(self):"),
            Some((ChunkKind::Function, "handle_order".to_string()))
        );
        assert_eq!(
            declaration("public final class CheckoutViewModel {"),
            Some((ChunkKind::Type, "CheckoutViewModel".to_string()))
        );
        assert_eq!(declaration("let value = 3"), None);
    }

    #[test]
    fn test_blank_file_has_no_chunks() {
        assert!(chunk_source("\n  \n").is_empty());
    }
}
