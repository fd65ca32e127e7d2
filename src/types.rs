//! Core entity model for the code graph
//!
//! Every cross-entity reference is a string id produced by a stable hash, so
//! reindexing an unchanged repository reproduces identical ids and the store
//! never needs an in-memory pointer graph.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{CieError, Result};

/// Compute a stable hex id from the given components.
///
/// SHA-256 over the `\x1f`-joined parts, truncated to 16 bytes. The
/// separator keeps `("ab","c")` and `("a","bc")` distinct.
pub fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Content hash for change detection (full SHA-256, hex)
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A source file tracked by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntity {
    pub id: String,
    pub path: String,
    pub hash: String,
    pub language: String,
    pub size: i64,
}

impl FileEntity {
    pub fn new(path: &str, bytes: &[u8], language: &str) -> Self {
        Self {
            id: stable_id(&["file", path]),
            path: path.to_string(),
            hash: content_hash(bytes),
            language: language.to_string(),
            size: bytes.len() as i64,
        }
    }
}

/// A function or method extracted from source
///
/// `name` is qualified for methods (`"Type.Method"`); anonymous function
/// literals get synthetic `"$lambda_N"` names. `code_text` is carried
/// separately so metadata queries can omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionEntity {
    pub id: String,
    pub name: String,
    pub signature: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub start_col: i64,
    pub end_col: i64,
    pub code_text: String,
}

impl FunctionEntity {
    /// Id is a stable hash over path, qualified name, signature, and span,
    /// so an unchanged file reproduces identical ids across runs.
    pub fn compute_id(
        file_path: &str,
        name: &str,
        signature: &str,
        start_line: i64,
        end_line: i64,
    ) -> String {
        stable_id(&[
            "fn",
            file_path,
            name,
            signature,
            &start_line.to_string(),
            &end_line.to_string(),
        ])
    }
}

/// Kind of a named type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Struct,
    Interface,
    Class,
    TypeAlias,
    Enum,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Struct => "struct",
            TypeKind::Interface => "interface",
            TypeKind::Class => "class",
            TypeKind::TypeAlias => "type_alias",
            TypeKind::Enum => "enum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "struct" => Some(TypeKind::Struct),
            "interface" => Some(TypeKind::Interface),
            "class" => Some(TypeKind::Class),
            "type_alias" => Some(TypeKind::TypeAlias),
            "enum" => Some(TypeKind::Enum),
            _ => None,
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named type (struct, interface, class, alias, enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeEntity {
    pub id: String,
    pub name: String,
    pub kind: TypeKind,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub code_text: String,
}

impl TypeEntity {
    pub fn compute_id(file_path: &str, name: &str, kind: TypeKind, start_line: i64) -> String {
        stable_id(&[
            "type",
            file_path,
            name,
            kind.as_str(),
            &start_line.to_string(),
        ])
    }
}

/// A struct field with its normalized base type.
///
/// The field type has pointers, slices, variadics, and package qualifiers
/// stripped; this is the join key for interface-dispatch resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructFieldEntity {
    pub id: String,
    pub struct_name: String,
    pub field_name: String,
    pub field_type: String,
    pub file_path: String,
    pub line: i64,
}

impl StructFieldEntity {
    pub fn new(
        struct_name: &str,
        field_name: &str,
        field_type: &str,
        file_path: &str,
        line: i64,
    ) -> Self {
        Self {
            id: stable_id(&["field", file_path, struct_name, field_name]),
            struct_name: struct_name.to_string(),
            field_name: field_name.to_string(),
            field_type: field_type.to_string(),
            file_path: file_path.to_string(),
            line,
        }
    }
}

/// An import statement. Blank imports are skipped at extraction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEntity {
    pub id: String,
    pub file_path: String,
    pub import_path: String,
    pub alias: String,
    pub start_line: i64,
}

impl ImportEntity {
    pub fn new(file_path: &str, import_path: &str, alias: &str, start_line: i64) -> Self {
        Self {
            id: stable_id(&["import", file_path, import_path, alias]),
            file_path: file_path.to_string(),
            import_path: import_path.to_string(),
            alias: alias.to_string(),
            start_line,
        }
    }
}

/// A resolved call edge between two functions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEdge {
    pub id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub call_line: i64,
}

impl CallEdge {
    pub fn new(caller_id: &str, callee_id: &str, call_line: i64) -> Self {
        Self {
            id: stable_id(&["call", caller_id, callee_id]),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            call_line,
        }
    }

    /// Dedup key; one edge per (caller, callee) pair survives
    pub fn key(&self) -> (String, String) {
        (self.caller_id.clone(), self.callee_id.clone())
    }
}

/// Concrete type implementing an interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementsEdge {
    pub id: String,
    pub type_name: String,
    pub interface_name: String,
    pub file_path: String,
}

impl ImplementsEdge {
    pub fn new(type_name: &str, interface_name: &str, file_path: &str) -> Self {
        Self {
            id: stable_id(&["implements", type_name, interface_name, file_path]),
            type_name: type_name.to_string(),
            interface_name: interface_name.to_string(),
            file_path: file_path.to_string(),
        }
    }
}

/// A call site whose callee is not locally defined; resolved in phase B of
/// the call resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedCall {
    pub caller_id: String,
    pub callee_name: String,
    pub file_path: String,
    pub call_line: i64,
}

/// Cooperative cancellation flag checked at well-defined points (batch
/// boundaries, BFS node visits, before store reads).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out with `Canceled` if the flag is set
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(CieError::Canceled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_is_deterministic() {
        let a = stable_id(&["fn", "src/a.go", "A"]);
        let b = stable_id(&["fn", "src/a.go", "A"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn stable_id_separator_prevents_collisions() {
        assert_ne!(stable_id(&["ab", "c"]), stable_id(&["a", "bc"]));
    }

    #[test]
    fn function_id_changes_with_span() {
        let a = FunctionEntity::compute_id("a.go", "Run", "func Run()", 1, 5);
        let b = FunctionEntity::compute_id("a.go", "Run", "func Run()", 2, 6);
        assert_ne!(a, b);
    }

    #[test]
    fn call_edge_id_ignores_line() {
        // Same pair at different lines dedups to one edge
        let a = CallEdge::new("c1", "c2", 10);
        let b = CallEdge::new("c1", "c2", 42);
        assert_eq!(a.id, b.id);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn cancel_token_trips_once_set() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(CieError::Canceled)));
    }

    #[test]
    fn type_kind_round_trips() {
        for kind in [
            TypeKind::Struct,
            TypeKind::Interface,
            TypeKind::Class,
            TypeKind::TypeAlias,
            TypeKind::Enum,
        ] {
            assert_eq!(TypeKind::parse(kind.as_str()), Some(kind));
        }
    }
}
