//! Call-path tracing: bounded BFS with cycle detection, waypoint
//! chaining, and interface-boundary diagnostics
//!
//! The queue carries `(current name, path so far)`; a per-source visited
//! set guarantees termination on cyclic graphs. Exploration is bounded by
//! a global node cap and a per-source callee-query cap, and cancellation
//! is checked every N node visits. When no path is found, the deepest
//! partial path ever dequeued drives the diagnostics.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use super::{functions_by_name, is_test_file, params, str_param, validate_regex, QueryEngine};
use crate::errors::{CieError, Result};
use crate::signature::parse_go_params;
use crate::store::dv_str;

/// Arguments for one trace
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TraceRequest {
    pub target: String,
    /// Starting function; entry points are auto-detected when absent
    pub source: Option<String>,
    /// Regex narrowing source candidates by file path
    pub path_pattern: Option<String>,
    pub max_paths: usize,
    pub max_depth: usize,
    /// Intermediate functions every path must pass through, in order
    pub waypoints: Vec<String>,
}

impl TraceRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: None,
            path_pattern: None,
            max_paths: 5,
            max_depth: 10,
            waypoints: Vec::new(),
        }
    }
}

/// Result of one trace
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TraceResult {
    /// Complete paths from a source to a target, as qualified names
    pub paths: Vec<Vec<String>>,
    /// A node or query budget was exhausted
    pub limit_reached: bool,
    /// The ambient cancellation signal fired; paths hold partial work
    pub canceled: bool,
    /// Longest partial path dequeued, kept even when no target was
    /// reached
    pub deepest_path: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl TraceResult {
    pub fn found(&self) -> bool {
        !self.paths.is_empty()
    }
}

/// Mutable exploration state shared across the sources of one trace call
struct Exploration {
    callee_cache: HashMap<String, Vec<String>>,
    nodes_visited: usize,
    limit_reached: bool,
}

impl QueryEngine {
    /// Trace call paths from source(s) to the target, optionally through
    /// waypoints
    pub async fn trace_path(&self, request: &TraceRequest) -> Result<TraceResult> {
        if request.target.trim().is_empty() {
            return Err(CieError::input("trace target must not be empty"));
        }
        if let Some(pattern) = &request.path_pattern {
            validate_regex(pattern)?;
        }
        let max_paths = request.max_paths.max(1);
        let max_depth = request.max_depth.max(1);

        let sources = match &request.source {
            Some(source) => self.names_matching(source, request.path_pattern.as_deref()).await?,
            None => self.detect_entry_points(request.path_pattern.as_deref()).await?,
        };
        if sources.is_empty() {
            return Ok(TraceResult {
                diagnostics: vec![match &request.source {
                    Some(s) => format!("source '{s}' is not an indexed function"),
                    None => "no entry points detected; pass an explicit source".to_string(),
                }],
                ..Default::default()
            });
        }

        if !request.waypoints.is_empty() {
            return self.trace_with_waypoints(request, &sources, max_depth).await;
        }

        let targets: HashSet<String> = self
            .names_matching(&request.target, None)
            .await?
            .into_iter()
            .collect();
        if targets.is_empty() {
            return Ok(TraceResult {
                diagnostics: vec![format!(
                    "target '{}' is not an indexed function",
                    request.target
                )],
                ..Default::default()
            });
        }

        let mut exploration = Exploration {
            callee_cache: HashMap::new(),
            nodes_visited: 0,
            limit_reached: false,
        };
        let mut result = TraceResult::default();

        'sources: for source in &sources {
            // Checked between sources and every N visits inside the BFS
            if self.cancel_token().is_canceled() {
                result.canceled = true;
                break;
            }
            let outcome = self
                .bfs(source, &targets, max_depth, max_paths, &mut exploration, &mut result)
                .await?;
            match outcome {
                BfsOutcome::Done => {}
                BfsOutcome::Canceled => {
                    result.canceled = true;
                    break 'sources;
                }
                BfsOutcome::BudgetExhausted => {
                    result.limit_reached = true;
                    if exploration.limit_reached {
                        break 'sources;
                    }
                }
            }
            if result.paths.len() >= max_paths {
                break;
            }
        }

        if result.paths.is_empty() && !result.canceled {
            self.explain_boundary(&mut result).await?;
        }
        debug!(
            target = %request.target,
            paths = result.paths.len(),
            nodes = exploration.nodes_visited,
            "trace complete"
        );
        Ok(result)
    }

    /// One BFS from `source`, accumulating into the shared result
    async fn bfs(
        &self,
        source: &str,
        targets: &HashSet<String>,
        max_depth: usize,
        max_paths: usize,
        exploration: &mut Exploration,
        result: &mut TraceResult,
    ) -> Result<BfsOutcome> {
        let limits = self.limits().clone();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queries_this_source = 0usize;
        let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
        queue.push_back((source.to_string(), vec![source.to_string()]));

        while let Some((current, path)) = queue.pop_front() {
            if result.paths.len() >= max_paths {
                return Ok(BfsOutcome::Done);
            }
            // Deepest partial tracks every dequeued path, including ones
            // the depth cap is about to skip
            if path.len() > result.deepest_path.len() {
                result.deepest_path = path.clone();
            }
            if path.len() > max_depth || visited.contains(&current) {
                continue;
            }
            visited.insert(current.clone());
            exploration.nodes_visited += 1;

            if exploration.nodes_visited % limits.cancel_check_interval == 0
                && self.cancel_token().is_canceled()
            {
                return Ok(BfsOutcome::Canceled);
            }
            if exploration.nodes_visited > limits.max_trace_nodes {
                exploration.limit_reached = true;
                return Ok(BfsOutcome::BudgetExhausted);
            }

            if targets.contains(&current) && path.len() > 1 {
                result.paths.push(path);
                continue;
            }

            if !exploration.callee_cache.contains_key(&current) {
                if queries_this_source >= limits.max_callee_queries_per_source {
                    return Ok(BfsOutcome::BudgetExhausted);
                }
                queries_this_source += 1;
                let callees = self.callees_by_name(&current).await?;
                exploration.callee_cache.insert(current.clone(), callees);
            }
            let callees = exploration.callee_cache[&current].clone();
            for callee in callees {
                if !visited.contains(&callee) {
                    let mut next = path.clone();
                    next.push(callee.clone());
                    queue.push_back((callee, next));
                }
            }
        }
        Ok(BfsOutcome::Done)
    }

    /// Waypoint chaining: one BFS per consecutive pair with max_paths=1,
    /// concatenating segments and dropping the duplicate junction node
    async fn trace_with_waypoints(
        &self,
        request: &TraceRequest,
        sources: &[String],
        max_depth: usize,
    ) -> Result<TraceResult> {
        let mut stops: Vec<String> = Vec::new();
        // Any matching source may start the chain; segments after the
        // first are pinned
        stops.extend(request.waypoints.iter().cloned());
        stops.push(request.target.clone());

        let mut full_path: Vec<String> = Vec::new();
        let mut segment_start: Vec<String> = sources.to_vec();
        let mut result = TraceResult::default();
        // Callee cache spans the whole trace call, segments included
        let mut exploration = Exploration {
            callee_cache: HashMap::new(),
            nodes_visited: 0,
            limit_reached: false,
        };

        for stop in &stops {
            let targets: HashSet<String> = self
                .names_matching(stop, None)
                .await?
                .into_iter()
                .collect();
            if targets.is_empty() {
                result.diagnostics.push(format!(
                    "waypoint '{stop}' is not an indexed function"
                ));
                return Ok(result);
            }

            let mut segment_result = TraceResult::default();
            for start in &segment_start {
                let outcome = self
                    .bfs(start, &targets, max_depth, 1, &mut exploration, &mut segment_result)
                    .await?;
                if matches!(outcome, BfsOutcome::Canceled) {
                    result.canceled = true;
                    return Ok(result);
                }
                if segment_result.found() {
                    break;
                }
            }
            result.limit_reached |= exploration.limit_reached;

            let Some(segment) = segment_result.paths.into_iter().next() else {
                let from = segment_start.first().cloned().unwrap_or_default();
                result.diagnostics.push(format!(
                    "no path found for segment '{from} → {stop}'"
                ));
                result.deepest_path = segment_result.deepest_path;
                return Ok(result);
            };

            if full_path.is_empty() {
                full_path.extend(segment);
            } else {
                // Drop the duplicated junction node
                full_path.extend(segment.into_iter().skip(1));
            }
            segment_start = vec![full_path.last().cloned().unwrap_or_default()];
        }

        result.deepest_path = full_path.clone();
        result.paths.push(full_path);
        Ok(result)
    }

    /// Direct callees of a function, by qualified name
    async fn callees_by_name(&self, name: &str) -> Result<Vec<String>> {
        let rows = self
            .store()
            .query(
                "?[callee_name] := *cie_calls{caller_id, callee_id}, \
                 *cie_function{id: caller_id, name: cn}, cn == $name, \
                 *cie_function{id: callee_id, name: callee_name}",
                params(&[("name", str_param(name))]),
            )
            .await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(dv_str).map(str::to_string))
            .collect())
    }

    /// Qualified names matching `name` (exact or `.name` suffix),
    /// optionally narrowed by file-path regex
    async fn names_matching(
        &self,
        name: &str,
        path_pattern: Option<&str>,
    ) -> Result<Vec<String>> {
        let rows = functions_by_name(self.store(), name).await?;
        let path_re = path_pattern.map(validate_regex).transpose()?;
        let mut names: Vec<String> = rows
            .into_iter()
            .filter(|row| {
                path_re
                    .as_ref()
                    .map(|re| re.is_match(&row.file_path))
                    .unwrap_or(true)
            })
            .map(|row| row.name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Language-specific entry-point detection, excluding test files:
    /// `main` in Go/Rust, `__main__`/`main` in Python, and free functions
    /// in `index`/`app`/`server`/`main` files for JS/TS
    async fn detect_entry_points(&self, path_pattern: Option<&str>) -> Result<Vec<String>> {
        let rows = self
            .store()
            .query(
                "?[name, file_path] := *cie_function{name, file_path}, name == 'main' \
                 ?[name, file_path] := *cie_function{name, file_path}, ends_with(name, '.main') \
                 ?[name, file_path] := *cie_function{name, file_path}, name == '__main__' \
                 ?[name, file_path] := *cie_function{name, file_path}, \
                 regex_matches(file_path, '(^|/)(index|app|server|main)[.](js|ts|mjs|cjs)$')",
                params(&[]),
            )
            .await?;
        let path_re = path_pattern.map(validate_regex).transpose()?;
        let mut names: Vec<String> = rows
            .rows
            .iter()
            .filter_map(|row| {
                let name = dv_str(row.first()?)?;
                let file = dv_str(row.get(1)?)?;
                if is_test_file(file) {
                    return None;
                }
                if let Some(re) = &path_re {
                    if !re.is_match(file) {
                        return None;
                    }
                }
                // Free functions only for the file-name based detection
                if !(name == "main" || name == "__main__" || name.ends_with(".main"))
                    && name.contains('.')
                {
                    return None;
                }
                Some(name.to_string())
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// When no path was found, inspect the tail of the deepest partial
    /// path for interface boundaries and suggest next steps.
    async fn explain_boundary(&self, result: &mut TraceResult) -> Result<()> {
        let Some(tail) = result.deepest_path.last().cloned() else {
            result
                .diagnostics
                .push("No path found".to_string());
            return Ok(());
        };
        result.diagnostics.push(format!(
            "No path found; deepest partial path ends at '{tail}' (length {})",
            result.deepest_path.len()
        ));

        let mut interfaces: Vec<String> = Vec::new();
        if let Some((type_name, _)) = tail.split_once('.') {
            // Interfaces reachable through the enclosing type's fields
            for (_field, field_type) in self.fields_of(type_name).await? {
                if !self.implementations_of(&field_type).await?.is_empty()
                    && !interfaces.contains(&field_type)
                {
                    interfaces.push(field_type);
                }
            }
        } else {
            // Standalone function: interfaces among its parameter types
            for function in functions_by_name(self.store(), &tail).await? {
                for param in parse_go_params(&function.signature) {
                    if !self.implementations_of(&param.type_name).await?.is_empty()
                        && !interfaces.contains(&param.type_name)
                    {
                        interfaces.push(param.type_name);
                    }
                }
            }
        }
        for interface in interfaces {
            result.diagnostics.push(format!(
                "next steps: resolve implementations of {interface}"
            ));
        }
        Ok(())
    }
}

enum BfsOutcome {
    Done,
    Canceled,
    BudgetExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RelationStore;
    use crate::types::{CallEdge, FunctionEntity};

    fn function(name: &str, file: &str) -> FunctionEntity {
        FunctionEntity {
            id: FunctionEntity::compute_id(file, name, name, 1, 10),
            name: name.to_string(),
            signature: format!("func {name}()"),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 10,
            start_col: 0,
            end_col: 0,
            code_text: String::new(),
        }
    }

    /// Build a store holding the chain A→B→C→D→E
    async fn chain_engine() -> QueryEngine {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let names = ["A", "B", "C", "D", "E"];
        let functions: Vec<FunctionEntity> =
            names.iter().map(|n| function(n, "chain.go")).collect();
        store.put_functions(&functions).await.unwrap();
        let edges: Vec<CallEdge> = functions
            .windows(2)
            .map(|w| CallEdge::new(&w[0].id, &w[1].id, 3))
            .collect();
        store.put_calls(&edges).await.unwrap();
        QueryEngine::new(store)
    }

    #[tokio::test]
    async fn finds_linear_path() {
        let engine = chain_engine().await;
        let mut request = TraceRequest::new("E");
        request.source = Some("A".to_string());
        let result = engine.trace_path(&request).await.unwrap();
        assert!(result.found());
        assert_eq!(result.paths[0], vec!["A", "B", "C", "D", "E"]);
        assert!(!result.limit_reached);
        assert!(!result.canceled);
    }

    #[tokio::test]
    async fn waypoint_pins_the_route() {
        let engine = chain_engine().await;
        let mut request = TraceRequest::new("E");
        request.source = Some("A".to_string());
        request.waypoints = vec!["C".to_string()];
        let result = engine.trace_path(&request).await.unwrap();
        assert_eq!(result.paths.len(), 1);
        assert_eq!(result.paths[0], vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn depth_cap_reports_deepest_partial() {
        let engine = chain_engine().await;
        let mut request = TraceRequest::new("E");
        request.source = Some("A".to_string());
        request.max_depth = 2;
        let result = engine.trace_path(&request).await.unwrap();
        assert!(!result.found());
        // Nodes beyond depth 2 are never expanded; the deepest dequeued
        // path has length 3 (A, B, C)
        assert_eq!(result.deepest_path.len(), 3);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.contains("No path found")));
    }

    #[tokio::test]
    async fn cycles_terminate() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let a = function("A", "cycle.go");
        let b = function("B", "cycle.go");
        store.put_functions(&[a.clone(), b.clone()]).await.unwrap();
        store
            .put_calls(&[CallEdge::new(&a.id, &b.id, 1), CallEdge::new(&b.id, &a.id, 2)])
            .await
            .unwrap();
        let engine = QueryEngine::new(store);

        let mut request = TraceRequest::new("Ghost");
        request.source = Some("A".to_string());
        let result = engine.trace_path(&request).await.unwrap();
        assert!(!result.found());
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.contains("not an indexed function")));
    }

    #[tokio::test]
    async fn cycle_with_real_target_still_terminates() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let a = function("A", "cycle.go");
        let b = function("B", "cycle.go");
        let t = function("T", "cycle.go");
        store.put_functions(&[a.clone(), b.clone(), t]).await.unwrap();
        store
            .put_calls(&[CallEdge::new(&a.id, &b.id, 1), CallEdge::new(&b.id, &a.id, 2)])
            .await
            .unwrap();
        let engine = QueryEngine::new(store);

        let mut request = TraceRequest::new("T");
        request.source = Some("A".to_string());
        let result = engine.trace_path(&request).await.unwrap();
        assert!(!result.found());
        assert_eq!(result.deepest_path, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn entry_points_detected_for_go_main() {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        let main = function("main", "cmd/app/main.go");
        let helper = function("helper", "cmd/app/main.go");
        store.put_functions(&[main.clone(), helper.clone()]).await.unwrap();
        store
            .put_calls(&[CallEdge::new(&main.id, &helper.id, 2)])
            .await
            .unwrap();
        let engine = QueryEngine::new(store);

        // No source: main is auto-detected
        let request = TraceRequest::new("helper");
        let result = engine.trace_path(&request).await.unwrap();
        assert!(result.found());
        assert_eq!(result.paths[0], vec!["main", "helper"]);
    }

    #[tokio::test]
    async fn canceled_trace_returns_partial_not_error() {
        let engine = chain_engine().await;
        let token = crate::types::CancelToken::new();
        token.cancel();
        let engine = engine.with_cancel(token);

        let mut request = TraceRequest::new("E");
        request.source = Some("A".to_string());
        let result = engine.trace_path(&request).await.unwrap();
        assert!(result.canceled);
    }

    #[tokio::test]
    async fn missing_waypoint_fails_with_segment_diagnostic() {
        let engine = chain_engine().await;
        let mut request = TraceRequest::new("E");
        request.source = Some("A".to_string());
        request.waypoints = vec!["Ghost".to_string()];
        let result = engine.trace_path(&request).await.unwrap();
        assert!(!result.found());
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.contains("Ghost")));
    }
}
