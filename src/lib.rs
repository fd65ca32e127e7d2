// CIE - Code Intelligence Engine
// Root library module

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod ingestion;
pub mod observability;
pub mod query;
pub mod resolver;
pub mod signature;
pub mod store;
pub mod types;

// Multi-language code parsing
pub mod parsing;

// Git integration: delta detection and history correlation
pub mod git;

// Re-export key types
pub use errors::{CieError, Result, StoreErrorKind};

pub use observability::{init_logging, init_logging_with_level, OperationTimer};

pub use types::{
    stable_id, CallEdge, CancelToken, FileEntity, FunctionEntity, ImplementsEdge, ImportEntity,
    StructFieldEntity, TypeEntity, TypeKind, UnresolvedCall,
};

pub use config::{IndexingOptions, ParserMode, QueryLimits};

// Re-export the relation store facade
pub use store::{RelationStore, META_INDEXING_IN_PROGRESS, META_LAST_INDEXED_COMMIT};

// Re-export the parsing surface
pub use parsing::{CodeParser, ParsedFile, ParserOptions, SupportedLanguage};

// Re-export the signature tokenizer
pub use signature::{normalize_type_name, parse_go_params, parse_go_returns, Param};

// Re-export the call resolver
pub use resolver::{CallResolver, ResolutionStats};

// Re-export ingestion
pub use ingestion::{IngestReport, IngestionCoordinator};

// Re-export the query engine
pub use query::{
    CallSite, CalleeResult, CallerResult, FunctionLookup, FunctionMatch, FunctionRow, IndexStatus,
    QueryEngine, SearchIn, SemanticHit, SemanticResult, SemanticRole, SignatureMatch, TextMatch,
    TraceRequest, TraceResult, TypeMatch,
};

// Re-export embedding providers
pub use embeddings::{EmbeddingClient, EmbeddingConfig, EmbeddingProvider};

// Re-export git integration
pub use git::{
    BlameReport, ChangeSet, CommandRunner, CommitSummary, FunctionHistory, GitCommandRunner,
    GitCorrelator, ScriptedRunner,
};
