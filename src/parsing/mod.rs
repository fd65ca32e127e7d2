//! Multi-language code parsing using tree-sitter
//!
//! One walker per language, all implementing the same extraction contract:
//! `(source, path) → (functions, types, fields, imports, unresolved calls)`.
//! Syntax errors never abort extraction; partial trees are mined for
//! whatever entities survive.

mod go;
mod java;
mod python;
mod rust_lang;
mod typescript;

pub use python::parse_python_fallback;

use std::collections::HashMap;
use tracing::warn;
use tree_sitter::{Language, Node, Parser};

use crate::config::ParserMode;
use crate::errors::{CieError, Result};
use crate::types::{
    CallEdge, FunctionEntity, ImplementsEdge, ImportEntity, StructFieldEntity, TypeEntity,
    UnresolvedCall,
};

/// Supported languages, selected per file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SupportedLanguage {
    Go,
    Python,
    TypeScript,
    JavaScript,
    Rust,
    Java,
}

impl SupportedLanguage {
    /// Detect language from file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "go" => Some(SupportedLanguage::Go),
            "py" => Some(SupportedLanguage::Python),
            "ts" | "tsx" => Some(SupportedLanguage::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(SupportedLanguage::JavaScript),
            "rs" => Some(SupportedLanguage::Rust),
            "java" => Some(SupportedLanguage::Java),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let ext = std::path::Path::new(path).extension()?.to_str()?;
        Self::from_extension(ext)
    }

    /// Get tree-sitter language for this language
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            SupportedLanguage::Go => tree_sitter_go::LANGUAGE.into(),
            SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            SupportedLanguage::TypeScript => {
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
            }
            SupportedLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            SupportedLanguage::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SupportedLanguage::Go => "go",
            SupportedLanguage::Python => "python",
            SupportedLanguage::TypeScript => "typescript",
            SupportedLanguage::JavaScript => "javascript",
            SupportedLanguage::Rust => "rust",
            SupportedLanguage::Java => "java",
        }
    }
}

/// Extraction options shared by every walker
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Bytes of code text kept per entity before truncation
    pub max_code_text_bytes: usize,
    pub parser_mode: ParserMode,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_code_text_bytes: 8 * 1024,
            parser_mode: ParserMode::Auto,
        }
    }
}

/// A call site observed during the walk, with enough caller context for
/// same-file resolution
#[derive(Debug, Clone)]
pub struct RawCall {
    pub caller_id: String,
    /// Enclosing type when the caller is a method
    pub caller_type: Option<String>,
    /// Receiver variable name when the caller is a method (`self`, `this`,
    /// or the Go receiver identifier)
    pub receiver_var: Option<String>,
    /// Callee text, verbatim for qualified forms (`pkg.Fn`, `recv.method`)
    pub callee_name: String,
    pub call_line: i64,
}

/// Complete extraction result for one source file
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub path: String,
    pub functions: Vec<FunctionEntity>,
    pub types: Vec<TypeEntity>,
    pub fields: Vec<StructFieldEntity>,
    pub imports: Vec<ImportEntity>,
    /// Same-file resolved edges
    pub call_edges: Vec<CallEdge>,
    /// Everything else, for phase B of the resolver
    pub unresolved_calls: Vec<UnresolvedCall>,
    /// Explicitly declared implements relations (TS/Java/Rust)
    pub implements: Vec<ImplementsEdge>,
    /// Interface name → method names, for batch-level method-set matching
    pub interface_methods: HashMap<String, Vec<String>>,
    pub error_count: usize,
    /// Raw calls pending local resolution; drained by `finish`
    pub(crate) raw_calls: Vec<RawCall>,
}

impl ParsedFile {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Resolve same-file calls into edges and bucket the remainder as
    /// unresolved. Called once by each walker after its tree walk.
    pub(crate) fn finish(&mut self) {
        let mut local: HashMap<&str, &str> = HashMap::new();
        for f in &self.functions {
            local.insert(f.name.as_str(), f.id.as_str());
        }

        let raw = std::mem::take(&mut self.raw_calls);
        let mut seen: std::collections::HashSet<(String, String)> = self
            .call_edges
            .iter()
            .map(|e| e.key())
            .collect();

        for call in raw {
            let mut resolved: Option<String> = None;

            if !call.callee_name.contains('.') {
                resolved = local.get(call.callee_name.as_str()).map(|s| s.to_string());
            } else {
                // An already-qualified name (`Builder.Build`) may be
                // defined right here
                resolved = local.get(call.callee_name.as_str()).map(|s| s.to_string());
                if resolved.is_none() {
                    if let (Some(caller_type), Some(receiver)) =
                        (call.caller_type.as_deref(), call.receiver_var.as_deref())
                    {
                        // `recv.m()` on the method's own receiver resolves
                        // to a sibling method when one exists in this file
                        let parts: Vec<&str> = call.callee_name.split('.').collect();
                        if parts.len() == 2 && parts[0] == receiver {
                            let qualified = format!("{caller_type}.{}", parts[1]);
                            resolved = local.get(qualified.as_str()).map(|s| s.to_string());
                        }
                    }
                }
            }

            match resolved {
                Some(callee_id) => {
                    let edge = CallEdge::new(&call.caller_id, &callee_id, call.call_line);
                    if seen.insert(edge.key()) {
                        self.call_edges.push(edge);
                    }
                }
                None => self.unresolved_calls.push(UnresolvedCall {
                    caller_id: call.caller_id,
                    callee_name: call.callee_name,
                    file_path: self.path.clone(),
                    call_line: call.call_line,
                }),
            }
        }
    }
}

/// Multi-language parser front end. Owns one tree-sitter parser and
/// re-targets it per file; workers lease one parser each.
pub struct CodeParser {
    parser: Parser,
    options: ParserOptions,
}

impl CodeParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            parser: Parser::new(),
            options,
        }
    }

    /// Parse one file and extract its entity stream.
    ///
    /// Returns `Err` only for unsupported extensions or a grammar-level
    /// failure; syntax errors inside the file are tolerated and counted.
    pub fn parse_file(&mut self, content: &str, path: &str) -> Result<ParsedFile> {
        let language = SupportedLanguage::from_path(path).ok_or_else(|| {
            CieError::input(format!("unsupported file extension: {path}"))
        })?;
        self.parse_with_language(content, path, language)
    }

    pub fn parse_with_language(
        &mut self,
        content: &str,
        path: &str,
        language: SupportedLanguage,
    ) -> Result<ParsedFile> {
        self.parser
            .set_language(&language.tree_sitter_language())
            .map_err(|e| CieError::input(format!("grammar unavailable for {path}: {e}")))?;

        let tree = self.parser.parse(content, None);
        let tree = match tree {
            Some(tree) => tree,
            None => {
                return Err(CieError::Parse {
                    file_path: path.to_string(),
                    error_count: 1,
                })
            }
        };

        let root = tree.root_node();
        let error_count = count_error_nodes(root);

        // A catastrophically broken Python tree falls back to the
        // indentation-based parser unless tree-sitter is forced.
        if language == SupportedLanguage::Python
            && self.options.parser_mode == ParserMode::Auto
            && tree_is_unusable(root)
        {
            warn!(path, "tree-sitter produced an unusable tree, using indentation fallback");
            let mut parsed = python::parse_python_fallback(content, path, &self.options);
            parsed.error_count = error_count.max(1);
            return Ok(parsed);
        }

        if error_count > 0 {
            warn!(path, error_count, "syntax errors during parse, keeping partial entities");
        }

        let mut parsed = match language {
            SupportedLanguage::Go => go::extract(root, content, path, &self.options),
            SupportedLanguage::Python => python::extract(root, content, path, &self.options),
            SupportedLanguage::TypeScript | SupportedLanguage::JavaScript => {
                typescript::extract(root, content, path, &self.options)
            }
            SupportedLanguage::Rust => rust_lang::extract(root, content, path, &self.options),
            SupportedLanguage::Java => java::extract(root, content, path, &self.options),
        };
        parsed.error_count = error_count;
        Ok(parsed)
    }
}

/// A tree whose root has only ERROR children carries nothing worth mining
fn tree_is_unusable(root: Node) -> bool {
    if root.child_count() == 0 {
        return false;
    }
    let mut cursor = root.walk();
    let result = root.children(&mut cursor).all(|c| c.is_error());
    result
}

fn count_error_nodes(node: Node) -> usize {
    let mut count = if node.is_error() || node.is_missing() { 1 } else { 0 };
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        count += count_error_nodes(child);
    }
    count
}

// --- helpers shared by the walkers -----------------------------------------

pub(crate) fn node_text<'a>(node: Node, src: &'a str) -> &'a str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

/// Capture code text, truncating past the limit with an explicit marker so
/// lossy storage is never silent.
pub(crate) fn truncate_code(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated]", &text[..end])
}

/// One-based line of a node's start
pub(crate) fn start_line(node: Node) -> i64 {
    node.start_position().row as i64 + 1
}

pub(crate) fn end_line(node: Node) -> i64 {
    node.end_position().row as i64 + 1
}
