//! Ingestion coordinator
//!
//! Drives one indexing run end to end: repository walk, delta detection,
//! parallel parsing, batch-level implements matching, call resolution, and
//! batched persistence in dependency order. Per-file parse failures are
//! warnings; only schema and store errors abort the run.

use glob::Pattern;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::IndexingOptions;
use crate::embeddings::EmbeddingClient;
use crate::errors::{CieError, Result};
use crate::git::{current_commit, detect_delta, CommandRunner};
use crate::observability::log_ingest_summary;
use crate::parsing::{CodeParser, ParsedFile, ParserOptions, SupportedLanguage};
use crate::resolver::CallResolver;
use crate::store::{RelationStore, META_INDEXING_IN_PROGRESS, META_LAST_INDEXED_COMMIT};
use crate::types::{
    CallEdge, CancelToken, FileEntity, FunctionEntity, ImplementsEdge, ImportEntity,
    StructFieldEntity, TypeEntity, TypeKind, UnresolvedCall,
};

const META_EMBEDDING_DIM: &str = "embedding_dim";

/// Summary statistics for one ingestion run
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IngestReport {
    pub files_indexed: usize,
    pub files_skipped_large: usize,
    pub functions: usize,
    pub types: usize,
    pub fields: usize,
    pub imports: usize,
    pub call_edges: usize,
    pub implements_edges: usize,
    pub parse_failures: usize,
    pub embedded_rows: usize,
    pub full_reindex: bool,
    pub elapsed_ms: u64,
}

/// One file's content staged for parsing
struct StagedFile {
    rel_path: String,
    content: String,
    language: SupportedLanguage,
}

/// Coordinates discovery, parsing, resolution, and persistence
pub struct IngestionCoordinator {
    store: RelationStore,
    options: IndexingOptions,
    embedding: Option<EmbeddingClient>,
    vcs: Option<Arc<dyn CommandRunner>>,
    cancel: CancelToken,
}

impl IngestionCoordinator {
    pub fn new(store: RelationStore, options: IndexingOptions) -> Self {
        Self {
            store,
            options,
            embedding: None,
            vcs: None,
            cancel: CancelToken::new(),
        }
    }

    /// Attach an embedding client; vectors are generated during ingestion
    /// and failures degrade to metadata-only rows.
    pub fn with_embeddings(mut self, client: EmbeddingClient) -> Self {
        self.embedding = Some(client);
        self
    }

    /// Attach a VCS runner, enabling delta detection
    pub fn with_vcs(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.vcs = Some(runner);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one ingestion pass over `repo_root`
    #[instrument(skip(self), fields(root = %repo_root.as_ref().display()))]
    pub async fn ingest(&self, repo_root: impl AsRef<Path> + std::fmt::Debug) -> Result<IngestReport> {
        let repo_root = repo_root.as_ref();
        let started = Instant::now();
        let mut report = IngestReport::default();

        self.store.ensure_schema().await?;
        self.check_embedding_dim().await?;

        // Readers treat an in-progress sentinel as a warning; it is
        // cleared only after the meta commit below.
        self.store.set_meta(META_INDEXING_IN_PROGRESS, "1").await?;

        let (staged, commit, full_reindex) = self.discover(repo_root, &mut report).await?;
        report.full_reindex = full_reindex;

        let parsed = self.parse_all(staged).await?;
        report.parse_failures = parsed.iter().filter(|(_, p)| p.error_count > 0).count();

        let batch = Batch::assemble(parsed);
        report.files_indexed = batch.files.len();
        report.functions = batch.functions.len();
        report.types = batch.types.len();
        report.fields = batch.fields.len();
        report.imports = batch.imports.len();
        report.implements_edges = batch.implements.len();

        let edges = self.resolve_calls(&batch, !report.full_reindex).await?;
        report.call_edges = edges.len();

        self.persist(&batch, &edges).await?;

        if let Some(client) = &self.embedding {
            report.embedded_rows = self.generate_embeddings(client, &batch).await?;
        }

        // Commit point: record the indexed commit in a single meta write,
        // then drop the sentinel.
        if let Some(commit) = commit {
            self.store
                .set_meta(META_LAST_INDEXED_COMMIT, &commit)
                .await?;
        }
        self.store.delete_meta(META_INDEXING_IN_PROGRESS).await?;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log_ingest_summary(
            report.files_indexed,
            report.functions,
            report.call_edges,
            report.parse_failures,
        );
        Ok(report)
    }

    /// Embedding dimension is fixed once per project
    async fn check_embedding_dim(&self) -> Result<()> {
        let dim = self.store.embedding_dim().to_string();
        match self.store.get_meta(META_EMBEDDING_DIM).await? {
            Some(existing) if existing != dim => Err(CieError::schema(format!(
                "project embedding dimension is {existing}, store opened with {dim}"
            ))),
            Some(_) => Ok(()),
            None => self.store.set_meta(META_EMBEDDING_DIM, &dim).await,
        }
    }

    /// Walk the repository (or the VCS delta) and stage file contents.
    /// Returns staged files, the commit to record, and whether this was a
    /// full reindex.
    async fn discover(
        &self,
        repo_root: &Path,
        report: &mut IngestReport,
    ) -> Result<(Vec<StagedFile>, Option<String>, bool)> {
        let commit = match &self.vcs {
            Some(runner) => match current_commit(runner.as_ref()).await {
                Ok(commit) => Some(commit),
                Err(e) => {
                    warn!(error = %e, "not a usable repository, delta detection disabled");
                    None
                }
            },
            None => None,
        };

        let previous = self.store.get_meta(META_LAST_INDEXED_COMMIT).await?;
        let delta = match (&self.vcs, &previous, &commit) {
            _ if self.options.force_full_reindex => None,
            (Some(runner), Some(old), Some(_)) => {
                match detect_delta(runner.as_ref(), old).await {
                    Ok(delta) => Some(delta),
                    Err(e) => {
                        warn!(error = %e, "delta detection failed, falling back to full reindex");
                        None
                    }
                }
            }
            _ => None,
        };

        let full_reindex = delta.is_none();
        let staged = match delta {
            Some(delta) => {
                for path in delta.paths_to_delete() {
                    self.cancel.check()?;
                    self.store.delete_entities_for_file(path).await?;
                }
                let wanted: HashSet<&str> = delta.paths_to_index().collect();
                self.stage_files(repo_root, Some(&wanted), report)?
            }
            None => self.stage_files(repo_root, None, report)?,
        };
        Ok((staged, commit, full_reindex))
    }

    fn stage_files(
        &self,
        repo_root: &Path,
        only: Option<&HashSet<&str>>,
        report: &mut IngestReport,
    ) -> Result<Vec<StagedFile>> {
        let globs: Vec<Pattern> = self
            .options
            .exclude_globs
            .iter()
            .filter_map(|g| match Pattern::new(g) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(glob = g, error = %e, "ignoring invalid exclude glob");
                    None
                }
            })
            .collect();

        let mut staged = Vec::new();
        for entry in WalkBuilder::new(repo_root).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "walk entry skipped");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let rel_path = match entry.path().strip_prefix(repo_root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if globs.iter().any(|g| g.matches(&rel_path)) {
                continue;
            }
            let language = match SupportedLanguage::from_path(&rel_path) {
                Some(l) => l,
                None => continue,
            };
            if let Some(only) = only {
                if !only.contains(rel_path.as_str()) {
                    continue;
                }
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size as usize > self.options.max_file_size {
                warn!(path = %rel_path, size, "skipping file over size ceiling");
                report.files_skipped_large += 1;
                continue;
            }
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %rel_path, error = %e, "unreadable file skipped");
                    continue;
                }
            };
            staged.push(StagedFile {
                rel_path,
                content,
                language,
            });
        }
        Ok(staged)
    }

    /// Parse every staged file on a worker pool; each worker leases its
    /// own parser for the duration of a file.
    async fn parse_all(&self, staged: Vec<StagedFile>) -> Result<Vec<(FileEntity, ParsedFile)>> {
        self.cancel.check()?;
        if staged.is_empty() {
            return Ok(Vec::new());
        }
        let parser_options = ParserOptions {
            max_code_text_bytes: self.options.max_code_text_bytes,
            parser_mode: self.options.parser_mode,
        };
        tokio::task::spawn_blocking(move || {
            staged
                .par_iter()
                .map_init(
                    || CodeParser::new(parser_options.clone()),
                    |parser, file| {
                        let entity = FileEntity::new(
                            &file.rel_path,
                            file.content.as_bytes(),
                            file.language.name(),
                        );
                        match parser.parse_with_language(
                            &file.content,
                            &file.rel_path,
                            file.language,
                        ) {
                            Ok(parsed) => Some((entity, parsed)),
                            Err(e) => {
                                warn!(path = %file.rel_path, error = %e, "parse failed");
                                None
                            }
                        }
                    },
                )
                .flatten_iter()
                .collect()
        })
        .await
        .map_err(|e| CieError::input(format!("parser pool failed: {e}")))
    }

    /// Build resolver indexes and resolve the batch's unresolved calls.
    ///
    /// On a delta run the indexes are built over the union of the batch
    /// and what the store already holds, so cross-file calls into
    /// unchanged files keep resolving.
    async fn resolve_calls(&self, batch: &Batch, augment_from_store: bool) -> Result<Vec<CallEdge>> {
        let mut functions = batch.functions.clone();
        let mut imports = batch.imports.clone();
        let mut fields = batch.fields.clone();
        let mut implements = batch.implements.clone();
        if augment_from_store {
            let batch_files: HashSet<&str> =
                batch.files.iter().map(|f| f.path.as_str()).collect();
            let stored = self.load_stored_indexes(&batch_files).await?;
            functions.extend(stored.0);
            imports.extend(stored.1);
            fields.extend(stored.2);
            implements.extend(stored.3);
        }

        let resolver = CallResolver::build(&functions, &imports, &fields, &implements);
        let (resolved, stats) = resolver.resolve(&batch.unresolved);
        debug!(
            direct = stats.resolved_direct,
            dispatch = stats.resolved_dispatch,
            unresolved = stats.unresolved,
            "call resolution complete"
        );

        // Merge resolver output with in-file edges, deduping by edge key;
        // an edge referencing an unknown function is orphaned and
        // rejected.
        let known: HashSet<&str> = functions.iter().map(|f| f.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for edge in batch.in_file_edges.iter().chain(resolved.iter()) {
            if !known.contains(edge.caller_id.as_str()) || !known.contains(edge.callee_id.as_str())
            {
                continue;
            }
            if seen.insert(edge.key()) {
                edges.push(edge.clone());
            }
        }
        Ok(edges)
    }

    /// Resolver inputs already persisted for files outside this batch
    async fn load_stored_indexes(
        &self,
        exclude_paths: &HashSet<&str>,
    ) -> Result<(
        Vec<FunctionEntity>,
        Vec<ImportEntity>,
        Vec<StructFieldEntity>,
        Vec<ImplementsEdge>,
    )> {
        use crate::store::{dv_int, dv_str};

        let functions = self
            .store
            .query(
                "?[id, name, signature, file_path] := *cie_function{id, name, signature, file_path}",
                Default::default(),
            )
            .await?;
        let functions = functions
            .rows
            .iter()
            .filter_map(|row| {
                let file_path = dv_str(row.get(3)?)?;
                if exclude_paths.contains(file_path) {
                    return None;
                }
                Some(FunctionEntity {
                    id: dv_str(row.first()?)?.to_string(),
                    name: dv_str(row.get(1)?)?.to_string(),
                    signature: dv_str(row.get(2)?)?.to_string(),
                    file_path: file_path.to_string(),
                    start_line: 0,
                    end_line: 0,
                    start_col: 0,
                    end_col: 0,
                    code_text: String::new(),
                })
            })
            .collect();

        let imports = self
            .store
            .query(
                "?[file_path, import_path, alias, start_line] := \
                 *cie_import{file_path, import_path, alias, start_line}",
                Default::default(),
            )
            .await?;
        let imports = imports
            .rows
            .iter()
            .filter_map(|row| {
                let file_path = dv_str(row.first()?)?;
                if exclude_paths.contains(file_path) {
                    return None;
                }
                Some(ImportEntity::new(
                    file_path,
                    dv_str(row.get(1)?)?,
                    dv_str(row.get(2)?)?,
                    dv_int(row.get(3)?)?,
                ))
            })
            .collect();

        let fields = self
            .store
            .query(
                "?[struct_name, field_name, field_type, file_path, line] := \
                 *cie_field{struct_name, field_name, field_type, file_path, line}",
                Default::default(),
            )
            .await?;
        let fields = fields
            .rows
            .iter()
            .filter_map(|row| {
                let file_path = dv_str(row.get(3)?)?;
                if exclude_paths.contains(file_path) {
                    return None;
                }
                Some(StructFieldEntity::new(
                    dv_str(row.first()?)?,
                    dv_str(row.get(1)?)?,
                    dv_str(row.get(2)?)?,
                    file_path,
                    dv_int(row.get(4)?)?,
                ))
            })
            .collect();

        let implements = self
            .store
            .query(
                "?[type_name, interface_name, file_path] := \
                 *cie_implements{type_name, interface_name, file_path}",
                Default::default(),
            )
            .await?;
        let implements = implements
            .rows
            .iter()
            .filter_map(|row| {
                let file_path = dv_str(row.get(2)?)?;
                if exclude_paths.contains(file_path) {
                    return None;
                }
                Some(ImplementsEdge::new(
                    dv_str(row.first()?)?,
                    dv_str(row.get(1)?)?,
                    file_path,
                ))
            })
            .collect();

        Ok((functions, imports, fields, implements))
    }

    /// Persist in dependency order, in bounded batches
    async fn persist(&self, batch: &Batch, edges: &[CallEdge]) -> Result<()> {
        let n = self.options.batch_target.max(1);

        for chunk in batch.files.chunks(n) {
            self.cancel.check()?;
            self.store.put_files(chunk).await?;
        }
        for chunk in batch.types.chunks(n) {
            self.cancel.check()?;
            self.store.put_types(chunk).await?;
        }
        for chunk in batch.functions.chunks(n) {
            self.cancel.check()?;
            self.store.put_functions(chunk).await?;
        }

        let function_code: Vec<(String, String)> = batch
            .functions
            .iter()
            .filter(|f| !f.code_text.is_empty())
            .map(|f| (f.id.clone(), f.code_text.clone()))
            .collect();
        for chunk in function_code.chunks(n) {
            self.store.put_function_code(chunk).await?;
        }
        let type_code: Vec<(String, String)> = batch
            .types
            .iter()
            .filter(|t| !t.code_text.is_empty())
            .map(|t| (t.id.clone(), t.code_text.clone()))
            .collect();
        for chunk in type_code.chunks(n) {
            self.store.put_type_code(chunk).await?;
        }

        for chunk in batch.fields.chunks(n) {
            self.store.put_fields(chunk).await?;
        }
        for chunk in batch.imports.chunks(n) {
            self.store.put_imports(chunk).await?;
        }
        for chunk in batch.implements.chunks(n) {
            self.store.put_implements(chunk).await?;
        }

        for chunk in batch.defines.chunks(n) {
            self.store.put_defines(chunk).await?;
        }
        for chunk in batch.defines_types.chunks(n) {
            self.store.put_defines_type(chunk).await?;
        }

        // Call edges last: every function they reference exists in-store
        for chunk in edges.chunks(n) {
            self.cancel.check()?;
            self.store.put_calls(chunk).await?;
        }
        Ok(())
    }

    async fn generate_embeddings(
        &self,
        client: &EmbeddingClient,
        batch: &Batch,
    ) -> Result<usize> {
        if client.config().dimension != self.store.embedding_dim() {
            return Err(CieError::schema(format!(
                "embedding client dimension {} does not match store dimension {}",
                client.config().dimension,
                self.store.embedding_dim()
            )));
        }

        let function_texts: Vec<(String, String)> = batch
            .functions
            .iter()
            .filter(|f| !f.code_text.is_empty())
            .map(|f| (f.id.clone(), f.code_text.clone()))
            .collect();
        let type_texts: Vec<(String, String)> = batch
            .types
            .iter()
            .filter(|t| !t.code_text.is_empty())
            .map(|t| (t.id.clone(), t.code_text.clone()))
            .collect();

        let function_vectors = client.embed_batch(&function_texts).await;
        let type_vectors = client.embed_batch(&type_texts).await;
        let embedded = function_vectors.len() + type_vectors.len();

        let n = self.options.batch_target.max(1);
        for chunk in function_vectors.chunks(n) {
            self.store
                .put_embeddings("cie_function_embedding", "function_id", chunk)
                .await?;
        }
        for chunk in type_vectors.chunks(n) {
            self.store
                .put_embeddings("cie_type_embedding", "type_id", chunk)
                .await?;
        }

        self.store
            .create_vector_index("cie_function_embedding", "embedding")
            .await?;
        self.store
            .create_vector_index("cie_type_embedding", "embedding")
            .await?;
        Ok(embedded)
    }
}

/// Everything extracted from one parse pass, flattened for the resolver
/// and the persistence phase
struct Batch {
    files: Vec<FileEntity>,
    functions: Vec<FunctionEntity>,
    types: Vec<TypeEntity>,
    fields: Vec<StructFieldEntity>,
    imports: Vec<ImportEntity>,
    implements: Vec<ImplementsEdge>,
    in_file_edges: Vec<CallEdge>,
    unresolved: Vec<UnresolvedCall>,
    defines: Vec<(String, String)>,
    defines_types: Vec<(String, String)>,
}

impl Batch {
    fn assemble(parsed: Vec<(FileEntity, ParsedFile)>) -> Self {
        let mut batch = Batch {
            files: Vec::new(),
            functions: Vec::new(),
            types: Vec::new(),
            fields: Vec::new(),
            imports: Vec::new(),
            implements: Vec::new(),
            in_file_edges: Vec::new(),
            unresolved: Vec::new(),
            defines: Vec::new(),
            defines_types: Vec::new(),
        };

        // Interface method sets merged across the whole batch, for Go
        // method-set matching below
        let mut interface_methods: HashMap<String, Vec<String>> = HashMap::new();
        let mut go_type_files: HashMap<String, String> = HashMap::new();
        let mut go_method_sets: HashMap<String, HashSet<String>> = HashMap::new();

        for (entity, file) in parsed {
            let file_id = entity.id.clone();
            batch.files.push(entity);

            for function in &file.functions {
                batch.defines.push((file_id.clone(), function.id.clone()));
                if file.path.ends_with(".go") {
                    if let Some((type_name, method)) = function.name.split_once('.') {
                        go_method_sets
                            .entry(type_name.to_string())
                            .or_default()
                            .insert(method.to_string());
                    }
                }
            }
            for ty in &file.types {
                batch.defines_types.push((file_id.clone(), ty.id.clone()));
                if file.path.ends_with(".go") && ty.kind == TypeKind::Struct {
                    go_type_files.insert(ty.name.clone(), ty.file_path.clone());
                }
            }
            for (interface, methods) in &file.interface_methods {
                interface_methods
                    .entry(interface.clone())
                    .or_default()
                    .extend(methods.iter().cloned());
            }

            batch.functions.extend(file.functions);
            batch.types.extend(file.types);
            batch.fields.extend(file.fields);
            batch.imports.extend(file.imports);
            batch.implements.extend(file.implements);
            batch.in_file_edges.extend(file.call_edges);
            batch.unresolved.extend(file.unresolved_calls);
        }

        // Go implements detection: a struct implements an interface when
        // its method set covers the interface's method set.
        let mut seen: HashSet<(String, String)> = batch
            .implements
            .iter()
            .map(|e| (e.type_name.clone(), e.interface_name.clone()))
            .collect();
        for (interface, methods) in &interface_methods {
            if methods.is_empty() {
                continue;
            }
            for (type_name, method_set) in &go_method_sets {
                let file_path = match go_type_files.get(type_name) {
                    Some(p) => p,
                    None => continue,
                };
                if methods.iter().all(|m| method_set.contains(m))
                    && seen.insert((type_name.clone(), interface.clone()))
                {
                    batch
                        .implements
                        .push(ImplementsEdge::new(type_name, interface, file_path));
                }
            }
        }

        batch
    }
}
