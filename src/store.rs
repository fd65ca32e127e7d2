//! Relation store adapter over the embedded Datalog engine
//!
//! Typed facade over a cozo `DbInstance`: schema creation and migration,
//! parameterized queries, bulk upserts, vector-index management, and the
//! cascading per-file delete used by incremental reindexing. The engine
//! itself is a black box; everything engine-specific lives in this module.
//!
//! Concurrency discipline: `query` takes the shared side of a single
//! reader-writer lock, `execute` and schema mutations take the exclusive
//! side. The query path is strictly read-only and rejects mutating scripts
//! before they reach the engine.

use cozo::{DataValue, DbInstance, NamedRows, ScriptMutability};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::errors::{CieError, Result, StoreErrorKind};
use crate::types::{
    stable_id, CallEdge, CancelToken, FileEntity, FunctionEntity, ImplementsEdge, ImportEntity,
    StructFieldEntity, TypeEntity,
};

/// Meta key recording the last fully indexed commit
pub const META_LAST_INDEXED_COMMIT: &str = "last_indexed_commit";
/// Meta key set while an ingestion run is in flight
pub const META_INDEXING_IN_PROGRESS: &str = "indexing_in_progress";
/// Meta key recording the schema revision
pub const META_SCHEMA_VERSION: &str = "schema_version";
/// Meta key recording the vector distance metric the indexes were built with
pub const META_EMBEDDING_METRIC: &str = "embedding_metric";

pub const SCHEMA_VERSION: &str = "2";

/// Typed facade over the Datalog relation store
#[derive(Clone)]
pub struct RelationStore {
    db: Arc<DbInstance>,
    rw: Arc<tokio::sync::RwLock<()>>,
    cancel: CancelToken,
    closed: Arc<AtomicBool>,
    embedding_dim: usize,
}

impl RelationStore {
    /// Connect to the engine described by `engine_spec`.
    ///
    /// Accepted specs: `"mem"`, `"sqlite:PATH"`, `"rocksdb:PATH"`.
    pub fn connect(engine_spec: &str, embedding_dim: usize) -> Result<Self> {
        let (engine, path) = match engine_spec.split_once(':') {
            Some((engine, path)) => (engine, path),
            None => (engine_spec, ""),
        };

        let db = DbInstance::new(engine, path, Default::default()).map_err(|e| {
            CieError::store(
                StoreErrorKind::Connect,
                format!("failed to open {engine_spec}: {e}"),
            )
        })?;

        Ok(Self {
            db: Arc::new(db),
            rw: Arc::new(tokio::sync::RwLock::new(())),
            cancel: CancelToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            embedding_dim,
        })
    }

    /// Handle sharing this store but observing the given cancellation token
    /// on the read path.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        let mut clone = self.clone();
        clone.cancel = cancel;
        clone
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Read-only query. Rejects scripts containing mutations.
    pub async fn query(
        &self,
        script: &str,
        params: BTreeMap<String, DataValue>,
    ) -> Result<NamedRows> {
        self.cancel.check()?;
        if script_mutates(script) {
            return Err(CieError::store(
                StoreErrorKind::ReadOnlyViolation,
                "mutating script submitted through the read-only query path",
            ));
        }
        let _guard = self.rw.read().await;
        self.run(script, params, ScriptMutability::Immutable).await
    }

    /// Mutating script, serialized behind the writer lock.
    pub async fn execute(
        &self,
        script: &str,
        params: BTreeMap<String, DataValue>,
    ) -> Result<NamedRows> {
        let _guard = self.rw.write().await;
        self.run(script, params, ScriptMutability::Mutable).await
    }

    async fn run(
        &self,
        script: &str,
        params: BTreeMap<String, DataValue>,
        mutability: ScriptMutability,
    ) -> Result<NamedRows> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CieError::store(
                StoreErrorKind::Connect,
                "store handle is closed",
            ));
        }
        let db = Arc::clone(&self.db);
        let script_owned = script.to_string();
        tokio::task::spawn_blocking(move || {
            db.run_script(&script_owned, params, mutability)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| CieError::store(StoreErrorKind::Execute, format!("store task failed: {e}")))?
        .map_err(classify_engine_error)
    }

    /// Create every relation idempotently, then run pending shape
    /// migrations.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        for script in schema_scripts(self.embedding_dim) {
            self.execute_tolerating_existing(&script).await?;
        }
        self.migrate_calls_shape().await?;

        if self.get_meta(META_SCHEMA_VERSION).await?.is_none() {
            self.set_meta(META_SCHEMA_VERSION, SCHEMA_VERSION).await?;
        }
        if self.get_meta(META_EMBEDDING_METRIC).await?.is_none() {
            self.set_meta(META_EMBEDDING_METRIC, "cosine").await?;
        }
        Ok(())
    }

    async fn execute_tolerating_existing(&self, script: &str) -> Result<()> {
        match self.execute(script, BTreeMap::new()).await {
            Ok(_) => Ok(()),
            Err(CieError::Store { message, .. })
                if message.contains("exist") || message.contains("conflict") =>
            {
                debug!("relation already present, skipping create");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Older deployments created `cie_calls` without the `call_line`
    /// column. Probe with a read; on failure copy rows out, recreate the
    /// relation with the new shape, and copy back with a zero default.
    async fn migrate_calls_shape(&self) -> Result<()> {
        let probe = self
            .query(
                "?[call_line] := *cie_calls{call_line} :limit 1",
                BTreeMap::new(),
            )
            .await;
        if probe.is_ok() {
            return Ok(());
        }
        warn!("cie_calls predates the call_line column, migrating");

        self.execute_tolerating_existing(
            ":create cie_calls_migrate { id: String => caller_id: String, callee_id: String }",
        )
        .await?;
        self.execute(
            "?[id, caller_id, callee_id] := *cie_calls{id, caller_id, callee_id} \
             :put cie_calls_migrate { id => caller_id, callee_id }",
            BTreeMap::new(),
        )
        .await?;
        self.execute("::remove cie_calls", BTreeMap::new()).await?;
        self.execute(
            ":create cie_calls { id: String => caller_id: String, callee_id: String, call_line: Int }",
            BTreeMap::new(),
        )
        .await?;
        self.execute(
            "?[id, caller_id, callee_id, call_line] := \
             *cie_calls_migrate{id, caller_id, callee_id}, call_line = 0 \
             :put cie_calls { id => caller_id, callee_id, call_line }",
            BTreeMap::new(),
        )
        .await?;
        self.execute("::remove cie_calls_migrate", BTreeMap::new())
            .await?;
        Ok(())
    }

    /// Create an HNSW index on a vector column, tolerating re-creation.
    pub async fn create_vector_index(&self, relation: &str, field: &str) -> Result<()> {
        let script = format!(
            "::hnsw create {relation}:semantic {{ \
             dim: {dim}, m: 16, dtype: F32, fields: [{field}], \
             distance: Cosine, ef_construction: 200 }}",
            dim = self.embedding_dim,
        );
        self.execute_tolerating_existing(&script).await
    }

    /// True once both embedding relations carry an HNSW index
    pub async fn vector_indexes_ready(&self) -> bool {
        let rows = self.query("::indices cie_function_embedding", BTreeMap::new()).await;
        matches!(rows, Ok(r) if !r.rows.is_empty())
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut params = BTreeMap::new();
        params.insert("key".to_string(), DataValue::Str(key.into()));
        let rows = self
            .query(
                "?[value] := *cie_project_meta{key, value}, key == $key",
                params,
            )
            .await?;
        Ok(rows
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(dv_str)
            .map(str::to_string))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("key".to_string(), DataValue::Str(key.into()));
        params.insert("value".to_string(), DataValue::Str(value.into()));
        self.execute(
            "?[key, value] <- [[$key, $value]] :put cie_project_meta { key => value }",
            params,
        )
        .await?;
        Ok(())
    }

    pub async fn delete_meta(&self, key: &str) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("key".to_string(), DataValue::Str(key.into()));
        self.execute("?[key] <- [[$key]] :rm cie_project_meta { key }", params)
            .await?;
        Ok(())
    }

    /// Remove every entity and edge keyed on `path`, edges first so no
    /// dangling reference survives the boundary of the operation.
    ///
    /// Each step tolerates failure independently; an empty or missing
    /// relation must not abort the cascade.
    #[instrument(skip(self))]
    pub async fn delete_entities_for_file(&self, path: &str) -> Result<()> {
        let file_id = stable_id(&["file", path]);
        let steps: &[&str] = &[
            // Call edges touching a function in this file, either side
            "?[id] := *cie_calls{id, caller_id}, *cie_function{id: caller_id, file_path: fp}, fp == $path \
             :rm cie_calls { id }",
            "?[id] := *cie_calls{id, callee_id}, *cie_function{id: callee_id, file_path: fp}, fp == $path \
             :rm cie_calls { id }",
            // Defines edges, keyed on the file id
            "?[id] := *cie_defines{id, file_id}, file_id == $file_id :rm cie_defines { id }",
            "?[id] := *cie_defines_type{id, file_id}, file_id == $file_id :rm cie_defines_type { id }",
            // Detached code and embedding sides
            "?[function_id] := *cie_function{id: function_id, file_path: fp}, fp == $path, *cie_function_code{function_id} \
             :rm cie_function_code { function_id }",
            "?[function_id] := *cie_function{id: function_id, file_path: fp}, fp == $path, *cie_function_embedding{function_id} \
             :rm cie_function_embedding { function_id }",
            "?[type_id] := *cie_type{id: type_id, file_path: fp}, fp == $path, *cie_type_code{type_id} \
             :rm cie_type_code { type_id }",
            "?[type_id] := *cie_type{id: type_id, file_path: fp}, fp == $path, *cie_type_embedding{type_id} \
             :rm cie_type_embedding { type_id }",
            // Implements edges recorded for this file
            "?[id] := *cie_implements{id, file_path: fp}, fp == $path :rm cie_implements { id }",
            // Entities themselves
            "?[id] := *cie_function{id, file_path: fp}, fp == $path :rm cie_function { id }",
            "?[id] := *cie_type{id, file_path: fp}, fp == $path :rm cie_type { id }",
            "?[id] := *cie_field{id, file_path: fp}, fp == $path :rm cie_field { id }",
            "?[id] := *cie_import{id, file_path: fp}, fp == $path :rm cie_import { id }",
            // Finally the file row
            "?[id] <- [[$file_id]] :rm cie_file { id }",
        ];

        for script in steps {
            let mut params = BTreeMap::new();
            params.insert("path".to_string(), DataValue::Str(path.into()));
            params.insert("file_id".to_string(), DataValue::Str(file_id.clone().into()));
            if let Err(e) = self.execute(script, params).await {
                debug!(path, error = %e, "delete step skipped");
            }
        }
        Ok(())
    }

    // --- bulk upserts -----------------------------------------------------

    async fn put_rows(&self, script: &str, rows: Vec<DataValue>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut params = BTreeMap::new();
        params.insert("rows".to_string(), DataValue::List(rows));
        self.execute(script, params).await?;
        Ok(())
    }

    pub async fn put_files(&self, files: &[FileEntity]) -> Result<()> {
        let rows = files
            .iter()
            .map(|f| {
                DataValue::List(vec![
                    DataValue::Str(f.id.as_str().into()),
                    DataValue::Str(f.path.as_str().into()),
                    DataValue::Str(f.hash.as_str().into()),
                    DataValue::Str(f.language.as_str().into()),
                    DataValue::from(f.size),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, path, hash, language, size] <- $rows \
             :put cie_file { id => path, hash, language, size }",
            rows,
        )
        .await
    }

    pub async fn put_functions(&self, functions: &[FunctionEntity]) -> Result<()> {
        let rows = functions
            .iter()
            .map(|f| {
                DataValue::List(vec![
                    DataValue::Str(f.id.as_str().into()),
                    DataValue::Str(f.name.as_str().into()),
                    DataValue::Str(f.signature.as_str().into()),
                    DataValue::Str(f.file_path.as_str().into()),
                    DataValue::from(f.start_line),
                    DataValue::from(f.end_line),
                    DataValue::from(f.start_col),
                    DataValue::from(f.end_col),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, name, signature, file_path, start_line, end_line, start_col, end_col] <- $rows \
             :put cie_function { id => name, signature, file_path, start_line, end_line, start_col, end_col }",
            rows,
        )
        .await
    }

    pub async fn put_function_code(&self, entries: &[(String, String)]) -> Result<()> {
        let rows = entries
            .iter()
            .map(|(id, code)| {
                DataValue::List(vec![
                    DataValue::Str(id.as_str().into()),
                    DataValue::Str(code.as_str().into()),
                ])
            })
            .collect();
        self.put_rows(
            "?[function_id, code_text] <- $rows :put cie_function_code { function_id => code_text }",
            rows,
        )
        .await
    }

    pub async fn put_types(&self, types: &[TypeEntity]) -> Result<()> {
        let rows = types
            .iter()
            .map(|t| {
                DataValue::List(vec![
                    DataValue::Str(t.id.as_str().into()),
                    DataValue::Str(t.name.as_str().into()),
                    DataValue::Str(t.kind.as_str().into()),
                    DataValue::Str(t.file_path.as_str().into()),
                    DataValue::from(t.start_line),
                    DataValue::from(t.end_line),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, name, kind, file_path, start_line, end_line] <- $rows \
             :put cie_type { id => name, kind, file_path, start_line, end_line }",
            rows,
        )
        .await
    }

    pub async fn put_type_code(&self, entries: &[(String, String)]) -> Result<()> {
        let rows = entries
            .iter()
            .map(|(id, code)| {
                DataValue::List(vec![
                    DataValue::Str(id.as_str().into()),
                    DataValue::Str(code.as_str().into()),
                ])
            })
            .collect();
        self.put_rows(
            "?[type_id, code_text] <- $rows :put cie_type_code { type_id => code_text }",
            rows,
        )
        .await
    }

    pub async fn put_fields(&self, fields: &[StructFieldEntity]) -> Result<()> {
        let rows = fields
            .iter()
            .map(|f| {
                DataValue::List(vec![
                    DataValue::Str(f.id.as_str().into()),
                    DataValue::Str(f.struct_name.as_str().into()),
                    DataValue::Str(f.field_name.as_str().into()),
                    DataValue::Str(f.field_type.as_str().into()),
                    DataValue::Str(f.file_path.as_str().into()),
                    DataValue::from(f.line),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, struct_name, field_name, field_type, file_path, line] <- $rows \
             :put cie_field { id => struct_name, field_name, field_type, file_path, line }",
            rows,
        )
        .await
    }

    pub async fn put_imports(&self, imports: &[ImportEntity]) -> Result<()> {
        let rows = imports
            .iter()
            .map(|i| {
                DataValue::List(vec![
                    DataValue::Str(i.id.as_str().into()),
                    DataValue::Str(i.file_path.as_str().into()),
                    DataValue::Str(i.import_path.as_str().into()),
                    DataValue::Str(i.alias.as_str().into()),
                    DataValue::from(i.start_line),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, file_path, import_path, alias, start_line] <- $rows \
             :put cie_import { id => file_path, import_path, alias, start_line }",
            rows,
        )
        .await
    }

    pub async fn put_defines(&self, edges: &[(String, String)]) -> Result<()> {
        let rows = edges
            .iter()
            .map(|(file_id, function_id)| {
                DataValue::List(vec![
                    DataValue::Str(stable_id(&["defines", file_id, function_id]).into()),
                    DataValue::Str(file_id.as_str().into()),
                    DataValue::Str(function_id.as_str().into()),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, file_id, function_id] <- $rows :put cie_defines { id => file_id, function_id }",
            rows,
        )
        .await
    }

    pub async fn put_defines_type(&self, edges: &[(String, String)]) -> Result<()> {
        let rows = edges
            .iter()
            .map(|(file_id, type_id)| {
                DataValue::List(vec![
                    DataValue::Str(stable_id(&["defines_type", file_id, type_id]).into()),
                    DataValue::Str(file_id.as_str().into()),
                    DataValue::Str(type_id.as_str().into()),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, file_id, type_id] <- $rows :put cie_defines_type { id => file_id, type_id }",
            rows,
        )
        .await
    }

    pub async fn put_calls(&self, edges: &[CallEdge]) -> Result<()> {
        let rows = edges
            .iter()
            .map(|e| {
                DataValue::List(vec![
                    DataValue::Str(e.id.as_str().into()),
                    DataValue::Str(e.caller_id.as_str().into()),
                    DataValue::Str(e.callee_id.as_str().into()),
                    DataValue::from(e.call_line),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, caller_id, callee_id, call_line] <- $rows \
             :put cie_calls { id => caller_id, callee_id, call_line }",
            rows,
        )
        .await
    }

    pub async fn put_implements(&self, edges: &[ImplementsEdge]) -> Result<()> {
        let rows = edges
            .iter()
            .map(|e| {
                DataValue::List(vec![
                    DataValue::Str(e.id.as_str().into()),
                    DataValue::Str(e.type_name.as_str().into()),
                    DataValue::Str(e.interface_name.as_str().into()),
                    DataValue::Str(e.file_path.as_str().into()),
                ])
            })
            .collect();
        self.put_rows(
            "?[id, type_name, interface_name, file_path] <- $rows \
             :put cie_implements { id => type_name, interface_name, file_path }",
            rows,
        )
        .await
    }

    /// Insert embedding vectors for one of the two embedding relations.
    /// The dimension of every vector must match the project dimension.
    pub async fn put_embeddings(
        &self,
        relation: &str,
        key_column: &str,
        entries: &[(String, Vec<f32>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for (id, vector) in entries {
            if vector.len() != self.embedding_dim {
                return Err(CieError::schema(format!(
                    "embedding dimension mismatch for {id}: expected {}, got {}",
                    self.embedding_dim,
                    vector.len()
                )));
            }
        }
        let rows = entries
            .iter()
            .map(|(id, vector)| {
                DataValue::List(vec![
                    DataValue::Str(id.as_str().into()),
                    DataValue::List(vector.iter().map(|x| DataValue::from(*x as f64)).collect()),
                ])
            })
            .collect();
        let script = format!(
            "data[{key}, l] <- $rows \
             ?[{key}, embedding] := data[{key}, l], embedding = vec(l) \
             :put {relation} {{ {key} => embedding }}",
            key = key_column,
        );
        self.put_rows(&script, rows).await
    }

    /// Count rows of a relation by its key column
    pub async fn count_relation(&self, relation: &str, key_column: &str) -> Result<i64> {
        let script = format!("?[count({key_column})] := *{relation}{{{key_column}}}");
        let rows = self.query(&script, BTreeMap::new()).await?;
        Ok(rows
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(dv_int)
            .unwrap_or(0))
    }

    /// Idempotent close; further calls on this handle fail with a connect
    /// error.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn script_mutates(script: &str) -> bool {
    [":put", ":rm", ":create", ":replace", "::remove", "::hnsw"]
        .iter()
        .any(|op| script.contains(op))
}

fn classify_engine_error(message: String) -> CieError {
    let lower = message.to_lowercase();
    let kind = if lower.contains("parse") || lower.contains("syntax") {
        StoreErrorKind::QueryParse
    } else {
        StoreErrorKind::Execute
    };
    CieError::store(kind, message)
}

fn schema_scripts(embedding_dim: usize) -> Vec<String> {
    vec![
        ":create cie_file { id: String => path: String, hash: String, language: String, size: Int }"
            .to_string(),
        ":create cie_function { id: String => name: String, signature: String, file_path: String, \
         start_line: Int, end_line: Int, start_col: Int, end_col: Int }"
            .to_string(),
        ":create cie_function_code { function_id: String => code_text: String }".to_string(),
        format!(
            ":create cie_function_embedding {{ function_id: String => embedding: <F32; {embedding_dim}> }}"
        ),
        ":create cie_type { id: String => name: String, kind: String, file_path: String, \
         start_line: Int, end_line: Int }"
            .to_string(),
        ":create cie_type_code { type_id: String => code_text: String }".to_string(),
        format!(
            ":create cie_type_embedding {{ type_id: String => embedding: <F32; {embedding_dim}> }}"
        ),
        ":create cie_import { id: String => file_path: String, import_path: String, alias: String, start_line: Int }"
            .to_string(),
        ":create cie_defines { id: String => file_id: String, function_id: String }".to_string(),
        ":create cie_defines_type { id: String => file_id: String, type_id: String }".to_string(),
        ":create cie_calls { id: String => caller_id: String, callee_id: String, call_line: Int }"
            .to_string(),
        ":create cie_field { id: String => struct_name: String, field_name: String, \
         field_type: String, file_path: String, line: Int }"
            .to_string(),
        ":create cie_implements { id: String => type_name: String, interface_name: String, file_path: String }"
            .to_string(),
        ":create cie_project_meta { key: String => value: String }".to_string(),
    ]
}

// --- row value helpers shared with the query engine ------------------------

pub fn dv_str(value: &DataValue) -> Option<&str> {
    match value {
        DataValue::Str(s) => Some(s),
        _ => None,
    }
}

pub fn dv_int(value: &DataValue) -> Option<i64> {
    match value {
        DataValue::Num(cozo::Num::Int(i)) => Some(*i),
        DataValue::Num(cozo::Num::Float(f)) => Some(*f as i64),
        _ => None,
    }
}

pub fn dv_float(value: &DataValue) -> Option<f64> {
    match value {
        DataValue::Num(cozo::Num::Float(f)) => Some(*f),
        DataValue::Num(cozo::Num::Int(i)) => Some(*i as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store() -> RelationStore {
        RelationStore::connect("mem", 4).expect("mem engine")
    }

    #[test]
    fn mutation_detection_covers_all_ops() {
        assert!(script_mutates("?[a] <- [[1]] :put cie_file { id }"));
        assert!(script_mutates("::remove cie_calls"));
        assert!(!script_mutates("?[id] := *cie_file{id}"));
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();
        assert_eq!(store.count_relation("cie_file", "id").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_rejects_mutations() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        let err = store
            .query(
                "?[id] <- [['x']] :rm cie_file { id }",
                BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CieError::Store {
                kind: StoreErrorKind::ReadOnlyViolation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn meta_round_trip() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        assert_eq!(store.get_meta("missing").await.unwrap(), None);
        store.set_meta(META_LAST_INDEXED_COMMIT, "abc123").await.unwrap();
        assert_eq!(
            store.get_meta(META_LAST_INDEXED_COMMIT).await.unwrap(),
            Some("abc123".to_string())
        );
        store.delete_meta(META_LAST_INDEXED_COMMIT).await.unwrap();
        assert_eq!(store.get_meta(META_LAST_INDEXED_COMMIT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_cascade_tolerates_empty_relations() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        // Nothing indexed yet; every step must be tolerated
        store.delete_entities_for_file("src/nothing.go").await.unwrap();
    }

    #[tokio::test]
    async fn put_and_count_files() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        let file = FileEntity::new("src/a.go", b"package a", "go");
        store.put_files(&[file.clone()]).await.unwrap();
        // Upsert is idempotent by id
        store.put_files(&[file]).await.unwrap();
        assert_eq!(store.count_relation("cie_file", "id").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embedding_dim_mismatch_is_schema_error() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        let err = store
            .put_embeddings(
                "cie_function_embedding",
                "function_id",
                &[("f1".to_string(), vec![0.1, 0.2])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CieError::Schema { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_use() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        store.close().await;
        store.close().await;
        assert!(store.query("?[id] := *cie_file{id}", BTreeMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn canceled_token_blocks_reads() {
        let store = mem_store();
        store.ensure_schema().await.unwrap();
        let token = CancelToken::new();
        let guarded = store.with_cancel(token.clone());
        token.cancel();
        assert!(matches!(
            guarded.query("?[id] := *cie_file{id}", BTreeMap::new()).await,
            Err(CieError::Canceled)
        ));
    }
}
