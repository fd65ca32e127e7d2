//! Caller/callee navigation with interface-dispatch expansion
//!
//! Direct edges come from the store; dispatch expansions add *possible*
//! callees/callers inferred from field types and parameter types. All
//! expansion paths dedup against one cumulative seen-set, and phase-1
//! results always exclude test files.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use super::{functions_by_name, is_test_file, params, str_param, QueryEngine};
use crate::errors::{CieError, Result};
use crate::signature::parse_go_params;
use crate::store::{dv_int, dv_str};

static METHOD_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

/// Base types that can never dispatch through an interface
static PRIMITIVES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "int", "int8", "int16", "int32", "int64", "uint", "uint8", "uint16", "uint32",
        "uint64", "uintptr", "float32", "float64", "complex64", "complex128", "string",
        "bool", "byte", "rune", "error", "any", "map", "chan", "func", "interface",
        "struct", "number", "void", "str",
    ]
    .into_iter()
    .collect()
});

/// One node in a caller/callee listing
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CallSite {
    pub function_id: String,
    pub name: String,
    pub file_path: String,
    pub call_line: i64,
    /// How this edge was found: `direct`, `field-interface`,
    /// `field-concrete`, or `param-interface`
    pub via: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CallerResult {
    pub target: String,
    pub callers: Vec<CallSite>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CalleeResult {
    pub source: String,
    pub callees: Vec<CallSite>,
}

impl QueryEngine {
    /// Who calls `name`? Direct edges plus interface-dispatch expansion:
    /// when `name` is `T.M` and `T` implements `I`, methods of structs
    /// holding an `I`-typed field that invoke `.M(` are added as
    /// potential callers.
    pub async fn find_callers(&self, name: &str) -> Result<CallerResult> {
        if name.trim().is_empty() {
            return Err(CieError::input("function name must not be empty"));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut callers = Vec::new();

        let rows = self
            .store()
            .query(
                "?[id, caller_name, file_path, start_line, call_line] := \
                 *cie_calls{caller_id: id, callee_id, call_line}, \
                 *cie_function{id: callee_id, name: cn}, \
                 (cn == $name or ends_with(cn, $suffix)), \
                 *cie_function{id, name: caller_name, file_path, start_line}",
                params(&[
                    ("name", str_param(name)),
                    ("suffix", str_param(&format!(".{name}"))),
                ]),
            )
            .await?;
        for row in &rows.rows {
            push_site(&mut callers, &mut seen, row, "direct");
        }

        // Interface-dispatch expansion for a method target
        if let Some((type_name, method)) = name.split_once('.') {
            for interface in self.interfaces_of(type_name).await? {
                for (struct_name, field_name) in self.fields_typed_as(&interface).await? {
                    let holders = self
                        .methods_with_code_of(&struct_name)
                        .await?;
                    let needle = format!("{field_name}.{method}(");
                    for (id, holder_name, file_path, start_line, code) in holders {
                        if is_test_file(&file_path) || !code.contains(&needle) {
                            continue;
                        }
                        if seen.insert(id.clone()) {
                            callers.push(CallSite {
                                function_id: id,
                                name: holder_name,
                                file_path,
                                call_line: start_line,
                                via: "field-interface".to_string(),
                            });
                        }
                    }
                }
            }
        }

        debug!(target = name, callers = callers.len(), "caller lookup");
        Ok(CallerResult {
            target: name.to_string(),
            callers,
        })
    }

    /// What does `name` call? Direct edges plus three dispatch
    /// expansions, all deduped against one seen-set. Dispatch candidates
    /// are filtered by the method names textually present in the caller's
    /// body whenever that extraction succeeds.
    pub async fn find_callees(&self, name: &str) -> Result<CalleeResult> {
        if name.trim().is_empty() {
            return Err(CieError::input("function name must not be empty"));
        }
        let sources = functions_by_name(self.store(), name).await?;
        if sources.is_empty() {
            return Err(CieError::input(format!("no indexed function named '{name}'")));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut callees = Vec::new();

        for source in &sources {
            self.cancel_token().check()?;

            // Phase 1: direct edges, test files excluded
            let rows = self
                .store()
                .query(
                    "?[id, callee_name, file_path, start_line, call_line] := \
                     *cie_calls{caller_id, callee_id: id, call_line}, caller_id == $cid, \
                     *cie_function{id, name: callee_name, file_path, start_line}",
                    params(&[("cid", str_param(&source.id))]),
                )
                .await?;
            for row in &rows.rows {
                push_site(&mut callees, &mut seen, row, "direct");
            }

            // Textual method-name filter from the caller's body; applied
            // only when extraction produced something
            let body = super::code_for_function(self.store(), &source.id).await?;
            let called_methods: HashSet<String> = body
                .as_deref()
                .map(extract_called_methods)
                .unwrap_or_default();
            let method_filter = if called_methods.is_empty() {
                None
            } else {
                Some(&called_methods)
            };

            if let Some((caller_type, _)) = source.name.split_once('.') {
                for (_field_name, field_type) in self.fields_of(caller_type).await? {
                    let implementations = self.implementations_of(&field_type).await?;
                    if !implementations.is_empty() {
                        // Expansion 2: interface-typed field
                        for implementation in implementations {
                            self.add_methods_of(
                                &implementation,
                                "field-interface",
                                method_filter,
                                &mut seen,
                                &mut callees,
                            )
                            .await?;
                        }
                    } else if !PRIMITIVES.contains(field_type.as_str()) {
                        // Expansion 3: concrete-typed field
                        self.add_methods_of(
                            &field_type,
                            "field-concrete",
                            method_filter,
                            &mut seen,
                            &mut callees,
                        )
                        .await?;
                    }
                }
            }

            // Expansion 4: parameter-typed interfaces
            for param in parse_go_params(&source.signature) {
                if PRIMITIVES.contains(param.type_name.as_str()) {
                    continue;
                }
                for implementation in self.implementations_of(&param.type_name).await? {
                    self.add_methods_of(
                        &implementation,
                        "param-interface",
                        method_filter,
                        &mut seen,
                        &mut callees,
                    )
                    .await?;
                }
            }
        }

        debug!(source = name, callees = callees.len(), "callee lookup");
        Ok(CalleeResult {
            source: name.to_string(),
            callees,
        })
    }

    async fn add_methods_of(
        &self,
        type_name: &str,
        via: &str,
        method_filter: Option<&HashSet<String>>,
        seen: &mut HashSet<String>,
        out: &mut Vec<CallSite>,
    ) -> Result<()> {
        let rows = self
            .store()
            .query(
                "?[id, name, file_path, start_line] := \
                 *cie_function{id, name, file_path, start_line}, \
                 starts_with(name, $prefix)",
                params(&[("prefix", str_param(&format!("{type_name}.")))]),
            )
            .await?;
        for row in &rows.rows {
            let (Some(id), Some(name), Some(file_path), Some(line)) = (
                row.first().and_then(dv_str),
                row.get(1).and_then(dv_str),
                row.get(2).and_then(dv_str),
                row.get(3).and_then(dv_int),
            ) else {
                continue;
            };
            if let Some(filter) = method_filter {
                let method = name.rsplit('.').next().unwrap_or(name);
                if !filter.contains(method) {
                    continue;
                }
            }
            if seen.insert(id.to_string()) {
                out.push(CallSite {
                    function_id: id.to_string(),
                    name: name.to_string(),
                    file_path: file_path.to_string(),
                    call_line: line,
                    via: via.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn interfaces_of(&self, type_name: &str) -> Result<Vec<String>> {
        let rows = self
            .store()
            .query(
                "?[interface_name] := *cie_implements{type_name, interface_name}, \
                 type_name == $t",
                params(&[("t", str_param(type_name))]),
            )
            .await?;
        Ok(collect_strings(&rows.rows))
    }

    pub(crate) async fn implementations_of(&self, interface_name: &str) -> Result<Vec<String>> {
        let rows = self
            .store()
            .query(
                "?[type_name] := *cie_implements{type_name, interface_name}, \
                 interface_name == $i",
                params(&[("i", str_param(interface_name))]),
            )
            .await?;
        Ok(collect_strings(&rows.rows))
    }

    pub(crate) async fn fields_of(&self, struct_name: &str) -> Result<Vec<(String, String)>> {
        let rows = self
            .store()
            .query(
                "?[field_name, field_type] := \
                 *cie_field{struct_name, field_name, field_type}, struct_name == $s",
                params(&[("s", str_param(struct_name))]),
            )
            .await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| {
                Some((
                    dv_str(row.first()?)?.to_string(),
                    dv_str(row.get(1)?)?.to_string(),
                ))
            })
            .collect())
    }

    async fn fields_typed_as(&self, field_type: &str) -> Result<Vec<(String, String)>> {
        let rows = self
            .store()
            .query(
                "?[struct_name, field_name] := \
                 *cie_field{struct_name, field_name, field_type}, field_type == $t",
                params(&[("t", str_param(field_type))]),
            )
            .await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| {
                Some((
                    dv_str(row.first()?)?.to_string(),
                    dv_str(row.get(1)?)?.to_string(),
                ))
            })
            .collect())
    }

    async fn methods_with_code_of(
        &self,
        type_name: &str,
    ) -> Result<Vec<(String, String, String, i64, String)>> {
        let rows = self
            .store()
            .query(
                "?[id, name, file_path, start_line, code_text] := \
                 *cie_function{id, name, file_path, start_line}, \
                 starts_with(name, $prefix), \
                 *cie_function_code{function_id: id, code_text}",
                params(&[("prefix", str_param(&format!("{type_name}.")))]),
            )
            .await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| {
                Some((
                    dv_str(row.first()?)?.to_string(),
                    dv_str(row.get(1)?)?.to_string(),
                    dv_str(row.get(2)?)?.to_string(),
                    dv_int(row.get(3)?)?,
                    dv_str(row.get(4)?)?.to_string(),
                ))
            })
            .collect())
    }
}

fn push_site(
    out: &mut Vec<CallSite>,
    seen: &mut HashSet<String>,
    row: &[cozo::DataValue],
    via: &str,
) {
    let (Some(id), Some(name), Some(file_path), Some(_start), Some(call_line)) = (
        row.first().and_then(dv_str),
        row.get(1).and_then(dv_str),
        row.get(2).and_then(dv_str),
        row.get(3).and_then(dv_int),
        row.get(4).and_then(dv_int),
    ) else {
        return;
    };
    if is_test_file(file_path) {
        return;
    }
    if seen.insert(id.to_string()) {
        out.push(CallSite {
            function_id: id.to_string(),
            name: name.to_string(),
            file_path: file_path.to_string(),
            call_line,
            via: via.to_string(),
        });
    }
}

/// Method names invoked in a body: every `.name(` occurrence
fn extract_called_methods(code: &str) -> HashSet<String> {
    METHOD_CALL_RE
        .captures_iter(code)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn collect_strings(rows: &[Vec<cozo::DataValue>]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.first().and_then(dv_str).map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RelationStore;
    use crate::types::{
        CallEdge, FunctionEntity, ImplementsEdge, StructFieldEntity,
    };

    fn function(name: &str, signature: &str, file: &str) -> FunctionEntity {
        FunctionEntity {
            id: FunctionEntity::compute_id(file, name, signature, 1, 20),
            name: name.to_string(),
            signature: signature.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 20,
            start_col: 0,
            end_col: 0,
            code_text: String::new(),
        }
    }

    /// Seed the S2 shape: Builder holds a Writer field, Backend
    /// implements Writer, Builder.Build calls b.w.Write(nil).
    async fn dispatch_engine() -> (QueryEngine, FunctionEntity, FunctionEntity) {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();

        let build = function("Builder.Build", "func (b Builder) Build()", "build.go");
        let write = function("Backend.Write", "func (Backend) Write(b []byte)", "backend.go");
        let main = function("main", "func main()", "main.go");
        store
            .put_functions(&[build.clone(), write.clone(), main.clone()])
            .await
            .unwrap();
        store
            .put_function_code(&[(build.id.clone(), "func (b Builder) Build() { b.w.Write(nil) }".to_string())])
            .await
            .unwrap();
        store
            .put_fields(&[StructFieldEntity::new("Builder", "w", "Writer", "build.go", 2)])
            .await
            .unwrap();
        store
            .put_implements(&[ImplementsEdge::new("Backend", "Writer", "backend.go")])
            .await
            .unwrap();
        store
            .put_calls(&[CallEdge::new(&main.id, &build.id, 3)])
            .await
            .unwrap();
        (QueryEngine::new(store), build, write)
    }

    #[tokio::test]
    async fn direct_callers_come_from_edges() {
        let (engine, _build, _) = dispatch_engine().await;
        let result = engine.find_callers("Builder.Build").await.unwrap();
        assert_eq!(result.callers.len(), 1);
        assert_eq!(result.callers[0].name, "main");
        assert_eq!(result.callers[0].via, "direct");
    }

    #[tokio::test]
    async fn interface_dispatch_expands_callers() {
        let (engine, build, _) = dispatch_engine().await;
        // Backend.Write has no direct edge; the Builder.Build body calls
        // w.Write through the Writer field
        let result = engine.find_callers("Backend.Write").await.unwrap();
        assert_eq!(result.callers.len(), 1);
        assert_eq!(result.callers[0].function_id, build.id);
        assert_eq!(result.callers[0].via, "field-interface");
    }

    #[tokio::test]
    async fn callee_expansion_through_interface_field() {
        let (engine, _, write) = dispatch_engine().await;
        let result = engine.find_callees("Builder.Build").await.unwrap();
        assert!(
            result
                .callees
                .iter()
                .any(|c| c.function_id == write.id && c.via == "field-interface"),
            "expected dispatch callee, got {:?}",
            result.callees
        );
    }

    #[tokio::test]
    async fn method_filter_prunes_unrelated_methods() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let build = function("Builder.Build", "func (b Builder) Build()", "build.go");
        let write = function("Backend.Write", "func (Backend) Write(b []byte)", "backend.go");
        let close = function("Backend.Close", "func (Backend) Close()", "backend.go");
        store
            .put_functions(&[build.clone(), write.clone(), close])
            .await
            .unwrap();
        store
            .put_function_code(&[(build.id.clone(), "{ b.w.Write(nil) }".to_string())])
            .await
            .unwrap();
        store
            .put_fields(&[StructFieldEntity::new("Builder", "w", "Writer", "build.go", 2)])
            .await
            .unwrap();
        store
            .put_implements(&[ImplementsEdge::new("Backend", "Writer", "backend.go")])
            .await
            .unwrap();

        let engine = QueryEngine::new(store);
        let result = engine.find_callees("Builder.Build").await.unwrap();
        let names: Vec<&str> = result.callees.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Backend.Write"));
        assert!(
            !names.contains(&"Backend.Close"),
            "Close is never invoked in the body and must be filtered"
        );
    }

    #[tokio::test]
    async fn param_interface_dispatch_expands() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let process = function("Process", "func Process(w Writer) error", "process.go");
        let write = function("Backend.Write", "func (Backend) Write(b []byte)", "backend.go");
        store.put_functions(&[process.clone(), write.clone()]).await.unwrap();
        store
            .put_implements(&[ImplementsEdge::new("Backend", "Writer", "backend.go")])
            .await
            .unwrap();

        let engine = QueryEngine::new(store);
        let result = engine.find_callees("Process").await.unwrap();
        assert!(result
            .callees
            .iter()
            .any(|c| c.function_id == write.id && c.via == "param-interface"));
    }

    #[tokio::test]
    async fn test_files_are_excluded_from_direct_results() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let target = function("Parse", "func Parse()", "parse.go");
        let test_caller = function("TestParse", "func TestParse(t *testing.T)", "parse_test.go");
        store.put_functions(&[target.clone(), test_caller.clone()]).await.unwrap();
        store
            .put_calls(&[CallEdge::new(&test_caller.id, &target.id, 8)])
            .await
            .unwrap();

        let engine = QueryEngine::new(store);
        let result = engine.find_callers("Parse").await.unwrap();
        assert!(result.callers.is_empty(), "test-file caller must be excluded");
    }

    #[tokio::test]
    async fn unknown_callee_source_is_input_error() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let engine = QueryEngine::new(store);
        assert!(matches!(
            engine.find_callees("Ghost").await,
            Err(CieError::Input { .. })
        ));
    }
}
