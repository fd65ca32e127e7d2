//! Two-phase cross-file call resolver
//!
//! Phase A builds global symbol and import indexes from the parsed batch;
//! phase B turns unresolved calls into concrete edges, including
//! interface-dispatch fan-out. The indexes are immutable once built, so
//! resolution parallelizes freely; the only writable state is the
//! import-path memoization cache behind a read-write lock.

use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use crate::types::{CallEdge, FunctionEntity, ImplementsEdge, ImportEntity, StructFieldEntity, UnresolvedCall};

/// Below this many calls resolution stays on the calling thread
pub const PARALLEL_THRESHOLD: usize = 1_000;

#[derive(Debug, Clone)]
struct PackageInfo {
    package_name: String,
    files: Vec<String>,
}

/// Immutable resolution indexes plus the memoized import-path cache
pub struct CallResolver {
    /// dir → package info
    package_index: HashMap<String, PackageInfo>,
    /// pkg dir → simple name → function id. Non-exported names are kept
    /// for same-package resolution.
    global_functions: HashMap<String, HashMap<String, String>>,
    /// file → alias → import paths. Dot imports collect under `"."`.
    file_imports: HashMap<String, HashMap<String, Vec<String>>>,
    /// `"Type.Method"` → function id, for dispatch
    qualified_functions: HashMap<String, String>,
    /// function id → qualified name
    function_names: HashMap<String, String>,
    /// struct name → field name → normalized field type
    field_index: HashMap<String, HashMap<String, String>>,
    /// interface name → implementing type names
    implements_index: HashMap<String, Vec<String>>,
    /// import path → package dir, memoized across workers
    import_memo: RwLock<HashMap<String, Option<String>>>,
}

/// Outcome counts for one resolution pass
#[derive(Debug, Clone, Default)]
pub struct ResolutionStats {
    pub input_calls: usize,
    pub resolved_direct: usize,
    pub resolved_dispatch: usize,
    pub unresolved: usize,
}

impl CallResolver {
    /// Phase A: single-threaded index build over the whole batch
    #[instrument(skip_all)]
    pub fn build(
        functions: &[FunctionEntity],
        imports: &[ImportEntity],
        fields: &[StructFieldEntity],
        implements: &[ImplementsEdge],
    ) -> Self {
        let mut package_index: HashMap<String, PackageInfo> = HashMap::new();
        let mut global_functions: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut qualified_functions = HashMap::new();
        let mut function_names = HashMap::new();

        for function in functions {
            let dir = parent_dir(&function.file_path);
            let entry = package_index.entry(dir.clone()).or_insert_with(|| PackageInfo {
                package_name: dir.rsplit('/').next().unwrap_or(&dir).to_string(),
                files: Vec::new(),
            });
            if !entry.files.contains(&function.file_path) {
                entry.files.push(function.file_path.clone());
            }

            function_names.insert(function.id.clone(), function.name.clone());
            if function.name.contains('.') {
                qualified_functions.insert(function.name.clone(), function.id.clone());
            } else {
                global_functions
                    .entry(dir)
                    .or_default()
                    .insert(function.name.clone(), function.id.clone());
            }
        }

        let mut file_imports: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        for import in imports {
            let alias = if import.alias.is_empty() {
                import
                    .import_path
                    .rsplit(['/', '.'])
                    .next()
                    .unwrap_or(&import.import_path)
                    .to_string()
            } else {
                import.alias.clone()
            };
            file_imports
                .entry(import.file_path.clone())
                .or_default()
                .entry(alias)
                .or_default()
                .push(import.import_path.clone());
        }

        let mut field_index: HashMap<String, HashMap<String, String>> = HashMap::new();
        for field in fields {
            field_index
                .entry(field.struct_name.clone())
                .or_default()
                .insert(field.field_name.clone(), field.field_type.clone());
        }

        let mut implements_index: HashMap<String, Vec<String>> = HashMap::new();
        for edge in implements {
            let types = implements_index
                .entry(edge.interface_name.clone())
                .or_default();
            if !types.contains(&edge.type_name) {
                types.push(edge.type_name.clone());
            }
        }

        debug!(
            packages = package_index.len(),
            qualified = qualified_functions.len(),
            interfaces = implements_index.len(),
            "resolver indexes built"
        );

        Self {
            package_index,
            global_functions,
            file_imports,
            qualified_functions,
            function_names,
            field_index,
            implements_index,
            import_memo: RwLock::new(HashMap::new()),
        }
    }

    /// Phase B: resolve every call, deduped by `(caller, callee)`.
    /// Output ordering is not guaranteed above the parallel threshold.
    #[instrument(skip_all, fields(calls = calls.len()))]
    pub fn resolve(&self, calls: &[UnresolvedCall]) -> (Vec<CallEdge>, ResolutionStats) {
        let per_call: Vec<Vec<CallEdge>> = if calls.len() < PARALLEL_THRESHOLD {
            calls.iter().map(|c| self.resolve_one(c)).collect()
        } else {
            let workers = num_cpus::get().min(8);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .expect("resolver worker pool");
            pool.install(|| calls.par_iter().map(|c| self.resolve_one(c)).collect())
        };

        let mut stats = ResolutionStats {
            input_calls: calls.len(),
            ..Default::default()
        };
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut edges = Vec::new();
        for resolved in &per_call {
            if resolved.is_empty() {
                stats.unresolved += 1;
                continue;
            }
            if resolved.len() == 1 {
                stats.resolved_direct += 1;
            } else {
                stats.resolved_dispatch += 1;
            }
            for edge in resolved {
                if seen.insert(edge.key()) {
                    edges.push(edge.clone());
                }
            }
        }
        (edges, stats)
    }

    /// Resolve a single call site. A dispatch hit fans out to one edge per
    /// implementing type.
    fn resolve_one(&self, call: &UnresolvedCall) -> Vec<CallEdge> {
        if call.callee_name.contains('.') {
            // A two-part name may already be a known qualified method
            // (`Builder.Build` from a typed-local rewrite)
            if let Some(id) = self.qualified_functions.get(&call.callee_name) {
                return vec![CallEdge::new(&call.caller_id, id, call.call_line)];
            }
            if let Some(edge) = self.resolve_qualified(call) {
                return vec![edge];
            }
            return self.resolve_dispatch(call);
        }

        // Bare name: same-package cross-file lookup first, then dot
        // imports.
        let dir = parent_dir(&call.file_path);
        if let Some(id) = self
            .global_functions
            .get(&dir)
            .and_then(|names| names.get(&call.callee_name))
        {
            return vec![CallEdge::new(&call.caller_id, id, call.call_line)];
        }
        for import_path in self.dot_imports(&call.file_path) {
            if let Some(pkg_dir) = self.resolve_import_path(&import_path) {
                if let Some(id) = self
                    .global_functions
                    .get(&pkg_dir)
                    .and_then(|names| names.get(&call.callee_name))
                {
                    if is_exported(&call.callee_name, &call.file_path) {
                        return vec![CallEdge::new(&call.caller_id, id, call.call_line)];
                    }
                }
            }
        }
        Vec::new()
    }

    /// `prefix.funcName` through the caller file's imports. Chains longer
    /// than two components keep only the final identifier as the function
    /// name.
    fn resolve_qualified(&self, call: &UnresolvedCall) -> Option<CallEdge> {
        let parts: Vec<&str> = call.callee_name.split('.').collect();
        let prefix = parts.first()?;
        let func_name = parts.last()?;

        let imports = self.file_imports.get(&call.file_path)?;
        for import_path in imports.get(*prefix)? {
            let pkg_dir = match self.resolve_import_path(import_path) {
                Some(dir) => dir,
                None => continue,
            };
            let id = match self
                .global_functions
                .get(&pkg_dir)
                .and_then(|names| names.get(*func_name))
            {
                Some(id) => id,
                None => continue,
            };
            let callee_file_is_go = self
                .package_index
                .get(&pkg_dir)
                .map(|p| p.files.iter().any(|f| f.ends_with(".go")))
                .unwrap_or(false);
            if callee_file_is_go && !starts_uppercase(func_name) {
                // Cross-package resolution requires an exported name
                continue;
            }
            return Some(CallEdge::new(&call.caller_id, id, call.call_line));
        }
        None
    }

    /// Field-interface dispatch: the caller is a method on `T`, the call is
    /// `receiver.method`, and `T` has a field whose normalized type is an
    /// interface with known implementations. One edge per implementation.
    fn resolve_dispatch(&self, call: &UnresolvedCall) -> Vec<CallEdge> {
        let caller_name = match self.function_names.get(&call.caller_id) {
            Some(name) => name,
            None => return Vec::new(),
        };
        let caller_type = match caller_name.split_once('.') {
            Some((t, _)) => t,
            None => return Vec::new(),
        };

        let parts: Vec<&str> = call.callee_name.split('.').collect();
        if parts.len() < 2 {
            return Vec::new();
        }
        let method = parts[parts.len() - 1];
        let receiver = parts[parts.len() - 2];

        let field_type = match self
            .field_index
            .get(caller_type)
            .and_then(|fields| fields.get(receiver))
        {
            Some(t) => t,
            None => return Vec::new(),
        };

        let mut edges = Vec::new();
        if let Some(implementations) = self.implements_index.get(field_type) {
            for type_name in implementations {
                let qualified = format!("{type_name}.{method}");
                if let Some(id) = self.qualified_functions.get(&qualified) {
                    edges.push(CallEdge::new(&call.caller_id, id, call.call_line));
                }
            }
        }
        edges
    }

    fn dot_imports(&self, file_path: &str) -> Vec<String> {
        self.file_imports
            .get(file_path)
            .and_then(|imports| imports.get("."))
            .cloned()
            .unwrap_or_default()
    }

    /// Map an import path onto a package directory: identity, then suffix
    /// match, then package-name fallback. Results are memoized.
    fn resolve_import_path(&self, import_path: &str) -> Option<String> {
        if let Some(cached) = self.import_memo.read().get(import_path) {
            return cached.clone();
        }

        let slashed = if import_path.contains('/') {
            import_path.to_string()
        } else {
            import_path.replace('.', "/")
        };

        let resolved = if self.package_index.contains_key(&slashed) {
            Some(slashed.clone())
        } else if let Some(dir) = self
            .package_index
            .keys()
            .filter(|dir| !dir.is_empty() && slashed.ends_with(dir.as_str()))
            .max_by_key(|dir| dir.len())
        {
            Some(dir.clone())
        } else {
            let last_segment = slashed.rsplit('/').next().unwrap_or(&slashed);
            self.package_index
                .iter()
                .find(|(_, info)| info.package_name == last_segment)
                .map(|(dir, _)| dir.clone())
        };

        self.import_memo
            .write()
            .insert(import_path.to_string(), resolved.clone());
        resolved
    }
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().map(char::is_uppercase).unwrap_or(false)
}

/// Go requires an exported name for cross-package access; other languages
/// have no equivalent rule here.
fn is_exported(name: &str, file_path: &str) -> bool {
    if file_path.ends_with(".go") {
        starts_uppercase(name)
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn call(caller: &FunctionEntity, callee: &str) -> UnresolvedCall {
        UnresolvedCall {
            caller_id: caller.id.clone(),
            callee_name: callee.to_string(),
            file_path: caller.file_path.clone(),
            call_line: 5,
        }
    }

    #[test]
    fn qualified_cross_package_call_resolves_when_exported() {
        let caller = function("Run", "app/main.go");
        let callee = function("Parse", "app/parser/parse.go");
        let imports = vec![ImportEntity::new("app/main.go", "example.com/app/parser", "", 1)];
        let resolver = CallResolver::build(&[caller.clone(), callee.clone()], &imports, &[], &[]);

        let (edges, stats) = resolver.resolve(&[call(&caller, "parser.Parse")]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].callee_id, callee.id);
        assert_eq!(stats.resolved_direct, 1);
    }

    #[test]
    fn unexported_cross_package_call_is_rejected() {
        let caller = function("Run", "app/main.go");
        let callee = function("parse", "app/parser/parse.go");
        let imports = vec![ImportEntity::new("app/main.go", "example.com/app/parser", "", 1)];
        let resolver = CallResolver::build(&[caller.clone(), callee], &imports, &[], &[]);

        let (edges, stats) = resolver.resolve(&[call(&caller, "parser.parse")]);
        assert!(edges.is_empty());
        assert_eq!(stats.unresolved, 1);
    }

    #[test]
    fn same_package_bare_call_resolves_across_files() {
        let caller = function("Run", "app/server/run.go");
        let callee = function("helper", "app/server/util.go");
        let resolver = CallResolver::build(&[caller.clone(), callee.clone()], &[], &[], &[]);

        let (edges, _) = resolver.resolve(&[call(&caller, "helper")]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].callee_id, callee.id);
    }

    #[test]
    fn dot_import_resolves_bare_exported_name() {
        let caller = function("Run", "app/main.go");
        let callee = function("Sqrt", "app/mathutil/sqrt.go");
        let imports = vec![ImportEntity::new("app/main.go", "example.com/app/mathutil", ".", 1)];
        let resolver = CallResolver::build(&[caller.clone(), callee.clone()], &imports, &[], &[]);

        let (edges, _) = resolver.resolve(&[call(&caller, "Sqrt")]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].callee_id, callee.id);
    }

    #[test]
    fn interface_dispatch_fans_out_per_implementation() {
        // Builder.Build calls b.w.Write; w is a Writer field; Backend and
        // Mock both implement Writer.
        let build = function("Builder.Build", "app/build.go");
        let backend_write = function("Backend.Write", "app/backend.go");
        let mock_write = function("Mock.Write", "app/mock.go");
        let fields = vec![StructFieldEntity::new("Builder", "w", "Writer", "app/build.go", 2)];
        let implements = vec![
            ImplementsEdge::new("Backend", "Writer", "app/backend.go"),
            ImplementsEdge::new("Mock", "Writer", "app/mock.go"),
        ];
        let resolver = CallResolver::build(
            &[build.clone(), backend_write.clone(), mock_write.clone()],
            &[],
            &fields,
            &implements,
        );

        let (edges, stats) = resolver.resolve(&[call(&build, "b.w.Write")]);
        assert_eq!(edges.len(), 2);
        let callee_ids: HashSet<&str> = edges.iter().map(|e| e.callee_id.as_str()).collect();
        assert!(callee_ids.contains(backend_write.id.as_str()));
        assert!(callee_ids.contains(mock_write.id.as_str()));
        assert_eq!(stats.resolved_dispatch, 1);
    }

    #[test]
    fn dispatch_requires_method_caller() {
        // Free function caller: no `T.` prefix, dispatch cannot apply
        let free = function("Build", "app/build.go");
        let backend_write = function("Backend.Write", "app/backend.go");
        let fields = vec![StructFieldEntity::new("Builder", "w", "Writer", "app/build.go", 2)];
        let implements = vec![ImplementsEdge::new("Backend", "Writer", "app/backend.go")];
        let resolver =
            CallResolver::build(&[free.clone(), backend_write], &[], &fields, &implements);

        let (edges, _) = resolver.resolve(&[call(&free, "b.w.Write")]);
        assert!(edges.is_empty());
    }

    #[test]
    fn duplicate_pairs_are_deduped() {
        let caller = function("Run", "app/run.go");
        let callee = function("helper", "app/util.go");
        let resolver = CallResolver::build(&[caller.clone(), callee.clone()], &[], &[], &[]);

        let calls = vec![call(&caller, "helper"), call(&caller, "helper")];
        let (edges, _) = resolver.resolve(&calls);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn large_batches_resolve_in_parallel() {
        let caller = function("Run", "app/run.go");
        let callee = function("helper", "app/util.go");
        let resolver = CallResolver::build(&[caller.clone(), callee.clone()], &[], &[], &[]);

        let calls: Vec<UnresolvedCall> =
            (0..PARALLEL_THRESHOLD + 100).map(|_| call(&caller, "helper")).collect();
        let (edges, stats) = resolver.resolve(&calls);
        assert_eq!(edges.len(), 1, "all duplicates collapse to one edge");
        assert_eq!(stats.input_calls, PARALLEL_THRESHOLD + 100);
    }

    #[test]
    fn import_memo_is_reused() {
        let caller = function("Run", "app/main.go");
        let callee = function("Parse", "app/parser/parse.go");
        let imports = vec![ImportEntity::new("app/main.go", "example.com/app/parser", "", 1)];
        let resolver = CallResolver::build(&[caller.clone(), callee], &imports, &[], &[]);

        let _ = resolver.resolve(&[call(&caller, "parser.Parse")]);
        assert!(resolver
            .import_memo
            .read()
            .contains_key("example.com/app/parser"));
    }
}
