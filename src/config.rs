//! Configuration consumed by the ingestion and query subsystems
//!
//! Parsing of config files is an external concern; these structs are the
//! recognized keys and their effects.

use serde::{Deserialize, Serialize};

/// Parser selection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserMode {
    /// Tree-sitter with language-specific fallbacks where one exists
    #[default]
    Auto,
    /// Tree-sitter only, no fallbacks
    Treesitter,
}

/// Options driving a single ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingOptions {
    /// Paths matching any of these globs are skipped during the walk
    pub exclude_globs: Vec<String>,
    /// Files larger than this many bytes are skipped with a diagnostic
    pub max_file_size: usize,
    /// Target row count per persistence batch
    pub batch_target: usize,
    /// Bytes of `code_text` kept per entity before truncation
    pub max_code_text_bytes: usize,
    /// Fixed embedding dimension for the project; mismatches are fatal
    pub embedding_dim: usize,
    /// Disable delta detection and reindex everything
    pub force_full_reindex: bool,
    pub parser_mode: ParserMode,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            exclude_globs: vec![
                "**/node_modules/**".to_string(),
                "**/vendor/**".to_string(),
                "**/.git/**".to_string(),
                "**/target/**".to_string(),
                "**/dist/**".to_string(),
            ],
            max_file_size: 1024 * 1024,
            batch_target: 500,
            max_code_text_bytes: 8 * 1024,
            embedding_dim: 768,
            force_full_reindex: false,
            parser_mode: ParserMode::Auto,
        }
    }
}

/// Bounds on graph traversal queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLimits {
    /// Hard cap on nodes explored across all sources of one trace
    pub max_trace_nodes: usize,
    /// Cap on callee queries issued per source
    pub max_callee_queries_per_source: usize,
    /// Cancellation check cadence, in node visits
    pub cancel_check_interval: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_trace_nodes: 5_000,
            max_callee_queries_per_source: 1_000,
            cancel_check_interval: 100,
        }
    }
}
