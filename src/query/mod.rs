//! Read-side query engine
//!
//! Symbol lookup, grep, call-graph navigation, interface-aware path
//! tracing, semantic search, and index status. Strictly read-only: every
//! store access goes through the adapter's query path, and long-running
//! operations honor the ambient cancellation token.

mod call_graph;
mod grep;
mod lookup;
mod semantic;
mod status;
mod trace;

pub use call_graph::{CallSite, CalleeResult, CallerResult};
pub use grep::{SearchIn, TextMatch};
pub use lookup::{FunctionLookup, FunctionMatch, SignatureMatch, TypeMatch};
pub use semantic::{SemanticHit, SemanticResult, SemanticRole};
pub use status::IndexStatus;
pub use trace::{TraceRequest, TraceResult};

use cozo::DataValue;
use std::collections::BTreeMap;

use crate::config::QueryLimits;
use crate::errors::{CieError, Result};
use crate::store::{dv_int, dv_str, RelationStore};
use crate::types::CancelToken;

/// Read-side API over an indexed project
pub struct QueryEngine {
    store: RelationStore,
    limits: QueryLimits,
    cancel: CancelToken,
}

impl QueryEngine {
    pub fn new(store: RelationStore) -> Self {
        Self::with_limits(store, QueryLimits::default())
    }

    pub fn with_limits(store: RelationStore, limits: QueryLimits) -> Self {
        Self {
            store,
            limits,
            cancel: CancelToken::new(),
        }
    }

    /// Engine sharing the same store but observing `cancel`
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            store: self.store.with_cancel(cancel.clone()),
            limits: self.limits.clone(),
            cancel,
        }
    }

    pub(crate) fn store(&self) -> &RelationStore {
        &self.store
    }

    pub(crate) fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// A function row as most queries return it
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionRow {
    pub id: String,
    pub name: String,
    pub signature: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
}

pub(crate) fn params(pairs: &[(&str, DataValue)]) -> BTreeMap<String, DataValue> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub(crate) fn str_param(value: &str) -> DataValue {
    DataValue::Str(value.into())
}

/// Validate a user-supplied regex against the host engine before it is
/// passed to the store. Malformed patterns are input errors.
pub(crate) fn validate_regex(pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|e| {
        CieError::input(format!(
            "invalid regex '{pattern}': {e}; use literal: true for verbatim matching"
        ))
    })
}

/// Test-file predicate applied to phase-1 results across languages
pub(crate) fn is_test_file(path: &str) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    path.ends_with("_test.go")
        || path.ends_with(".test.ts")
        || path.ends_with(".test.js")
        || path.ends_with(".spec.ts")
        || path.ends_with(".spec.js")
        || file_name.starts_with("test_") && path.ends_with(".py")
        || path.ends_with("_test.py")
        || (file_name.starts_with("Test") && path.ends_with(".java"))
        || (path.ends_with(".rs") && (path.contains("/tests/") || path.starts_with("tests/")))
}

/// Fetch function rows whose name equals `name` or ends with `.name`
pub(crate) async fn functions_by_name(
    store: &RelationStore,
    name: &str,
) -> Result<Vec<FunctionRow>> {
    let rows = store
        .query(
            "?[id, name, signature, file_path, start_line, end_line] := \
             *cie_function{id, name, signature, file_path, start_line, end_line}, name == $name \
             ?[id, name, signature, file_path, start_line, end_line] := \
             *cie_function{id, name, signature, file_path, start_line, end_line}, \
             ends_with(name, $suffix)",
            params(&[
                ("name", str_param(name)),
                ("suffix", str_param(&format!(".{name}"))),
            ]),
        )
        .await?;
    Ok(rows.rows.iter().filter_map(|row| row_to_function(row)).collect())
}

pub(crate) fn row_to_function(row: &[DataValue]) -> Option<FunctionRow> {
    Some(FunctionRow {
        id: dv_str(row.first()?)?.to_string(),
        name: dv_str(row.get(1)?)?.to_string(),
        signature: dv_str(row.get(2)?)?.to_string(),
        file_path: dv_str(row.get(3)?)?.to_string(),
        start_line: dv_int(row.get(4)?)?,
        end_line: dv_int(row.get(5)?)?,
    })
}

/// Fetch the detachable code text for one function
pub(crate) async fn code_for_function(
    store: &RelationStore,
    function_id: &str,
) -> Result<Option<String>> {
    let rows = store
        .query(
            "?[code_text] := *cie_function_code{function_id, code_text}, function_id == $id",
            params(&[("id", str_param(function_id))]),
        )
        .await?;
    Ok(rows
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(dv_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_predicate_covers_languages() {
        assert!(is_test_file("pkg/server_test.go"));
        assert!(is_test_file("src/app.test.ts"));
        assert!(is_test_file("src/app.spec.js"));
        assert!(is_test_file("tests/test_indexer.py"));
        assert!(is_test_file("app/util_test.py"));
        assert!(is_test_file("src/TestWorker.java"));
        assert!(is_test_file("tests/integration.rs"));
        assert!(!is_test_file("pkg/server.go"));
        assert!(!is_test_file("src/app.ts"));
        assert!(!is_test_file("src/worker.java"));
    }

    #[test]
    fn regex_validation_produces_input_error() {
        assert!(validate_regex("Run.*").is_ok());
        let err = validate_regex("Run[").unwrap_err();
        assert!(matches!(err, CieError::Input { .. }));
        assert!(err.to_string().contains("literal: true"));
    }
}
