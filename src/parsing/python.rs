//! Python AST walker and indentation-based fallback parser
//!
//! The tree-sitter walker is primary. The fallback is line-oriented and
//! kicks in when tree-sitter yields an unusable tree; both must agree on
//! qualified method names (`Class.method`).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tree_sitter::Node;

use super::{end_line, node_text, start_line, truncate_code, ParsedFile, ParserOptions, RawCall};
use crate::types::{FunctionEntity, ImportEntity, TypeEntity, TypeKind};

/// Keywords and common builtins excluded from call extraction
static PY_DENYLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // keywords that read like calls
        "if", "elif", "else", "for", "while", "return", "yield", "assert", "del", "raise",
        "with", "lambda", "not", "and", "or", "in", "is", "print",
        // builtins
        "len", "range", "str", "int", "float", "bool", "list", "dict", "set", "tuple",
        "type", "isinstance", "issubclass", "super", "enumerate", "zip", "map", "filter",
        "sorted", "reversed", "open", "getattr", "setattr", "hasattr", "repr", "id", "abs",
        "min", "max", "sum", "any", "all", "iter", "next", "format", "vars", "dir",
    ]
    .into_iter()
    .collect()
});

#[derive(Clone, Default)]
struct Scope {
    caller_id: Option<String>,
    class_name: Option<String>,
    receiver_var: Option<String>,
}

struct PyWalker<'a> {
    src: &'a str,
    path: &'a str,
    opts: &'a ParserOptions,
    out: ParsedFile,
    lambda_counter: usize,
}

pub(super) fn extract(root: Node, src: &str, path: &str, opts: &ParserOptions) -> ParsedFile {
    let mut walker = PyWalker {
        src,
        path,
        opts,
        out: ParsedFile::new(path),
        lambda_counter: 0,
    };
    walker.walk(root, &Scope::default());
    walker.out.finish();
    walker.out
}

impl<'a> PyWalker<'a> {
    fn walk(&mut self, node: Node, scope: &Scope) {
        match node.kind() {
            "function_definition" => self.handle_function(node, scope),
            "class_definition" => self.handle_class(node),
            "decorated_definition" => {
                if let Some(def) = node.child_by_field_name("definition") {
                    self.walk(def, scope);
                }
            }
            "import_statement" => self.handle_import(node),
            "import_from_statement" => self.handle_import_from(node),
            "call" => {
                self.handle_call(node, scope);
                self.walk_children(node, scope);
            }
            "lambda" => self.handle_lambda(node, scope),
            _ => self.walk_children(node, scope),
        }
    }

    fn walk_children(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, scope);
        }
    }

    fn handle_function(&mut self, node: Node, scope: &Scope) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let bare = node_text(name_node, self.src);
        let name = match &scope.class_name {
            Some(class) => format!("{class}.{bare}"),
            None => bare.to_string(),
        };

        let signature = self.header_text(node);
        let id = self.push_function(node, &name, &signature);

        let receiver = scope
            .class_name
            .as_ref()
            .and_then(|_| self.first_param_name(node));
        let inner = Scope {
            caller_id: Some(id),
            class_name: scope.class_name.clone(),
            receiver_var: receiver,
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &inner);
        }
    }

    fn first_param_name(&self, node: Node) -> Option<String> {
        let params = node.child_by_field_name("parameters")?;
        let mut cursor = params.walk();
        let result = params
            .children(&mut cursor)
            .find(|c| c.kind() == "identifier")
            .map(|n| node_text(n, self.src).to_string());
        result
    }

    fn handle_class(&mut self, node: Node) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let name = node_text(name_node, self.src).to_string();
        self.out.types.push(TypeEntity {
            id: TypeEntity::compute_id(self.path, &name, TypeKind::Class, start_line(node)),
            name: name.clone(),
            kind: TypeKind::Class,
            file_path: self.path.to_string(),
            start_line: start_line(node),
            end_line: end_line(node),
            code_text: truncate_code(node_text(node, self.src), self.opts.max_code_text_bytes),
        });

        let scope = Scope {
            caller_id: None,
            class_name: Some(name),
            receiver_var: None,
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &scope);
        }
    }

    fn handle_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    let path = node_text(child, self.src);
                    self.out.imports.push(ImportEntity::new(
                        self.path,
                        path,
                        "",
                        start_line(node),
                    ));
                }
                "aliased_import" => {
                    let path = child
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.src))
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| node_text(n, self.src))
                        .unwrap_or_default();
                    self.out.imports.push(ImportEntity::new(
                        self.path,
                        path,
                        alias,
                        start_line(node),
                    ));
                }
                _ => {}
            }
        }
    }

    fn handle_import_from(&mut self, node: Node) {
        let module = node
            .child_by_field_name("module_name")
            .map(|n| node_text(n, self.src).to_string())
            .unwrap_or_default();
        if module.is_empty() {
            return;
        }
        let mut cursor = node.walk();
        let mut pushed_any = false;
        for child in node.children(&mut cursor) {
            if Some(child) == node.child_by_field_name("module_name") {
                continue;
            }
            match child.kind() {
                "dotted_name" | "identifier" => {
                    let item = node_text(child, self.src);
                    self.out.imports.push(ImportEntity::new(
                        self.path,
                        &format!("{module}.{item}"),
                        item,
                        start_line(node),
                    ));
                    pushed_any = true;
                }
                "aliased_import" => {
                    let item = child
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.src))
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| node_text(n, self.src))
                        .unwrap_or_default();
                    self.out.imports.push(ImportEntity::new(
                        self.path,
                        &format!("{module}.{item}"),
                        alias,
                        start_line(node),
                    ));
                    pushed_any = true;
                }
                _ => {}
            }
        }
        if !pushed_any {
            self.out
                .imports
                .push(ImportEntity::new(self.path, &module, "", start_line(node)));
        }
    }

    fn handle_call(&mut self, node: Node, scope: &Scope) {
        let caller_id = match &scope.caller_id {
            Some(id) => id.clone(),
            None => return,
        };
        let function = match node.child_by_field_name("function") {
            Some(f) => f,
            None => return,
        };
        let callee_name = match function.kind() {
            "identifier" => {
                let text = node_text(function, self.src);
                if PY_DENYLIST.contains(text) {
                    return;
                }
                text.to_string()
            }
            "attribute" => node_text(function, self.src).to_string(),
            _ => return,
        };
        self.out.raw_calls.push(RawCall {
            caller_id,
            caller_type: scope.class_name.clone(),
            receiver_var: scope.receiver_var.clone(),
            callee_name,
            call_line: start_line(node),
        });
    }

    fn handle_lambda(&mut self, node: Node, scope: &Scope) {
        self.lambda_counter += 1;
        let name = format!("$lambda_{}", self.lambda_counter);
        let signature = truncate_code(node_text(node, self.src), 120);
        let id = self.push_function(node, &name, &signature);
        let inner = Scope {
            caller_id: Some(id),
            class_name: scope.class_name.clone(),
            receiver_var: scope.receiver_var.clone(),
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, &inner);
        }
    }

    /// The `def` header up to the body, without the trailing colon
    fn header_text(&self, node: Node) -> String {
        let start = node.start_byte();
        let end = node
            .child_by_field_name("body")
            .map(|b| b.start_byte())
            .unwrap_or_else(|| node.end_byte());
        self.src[start..end]
            .trim()
            .trim_end_matches(':')
            .trim()
            .to_string()
    }

    fn push_function(&mut self, node: Node, name: &str, signature: &str) -> String {
        let id = FunctionEntity::compute_id(
            self.path,
            name,
            signature,
            start_line(node),
            end_line(node),
        );
        self.out.functions.push(FunctionEntity {
            id: id.clone(),
            name: name.to_string(),
            signature: signature.to_string(),
            file_path: self.path.to_string(),
            start_line: start_line(node),
            end_line: end_line(node),
            start_col: node.start_position().column as i64,
            end_col: node.end_position().column as i64,
            code_text: truncate_code(node_text(node, self.src), self.opts.max_code_text_bytes),
        });
        id
    }
}

// --- indentation-based fallback --------------------------------------------

static DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^import\s+([A-Za-z_][\w.]*)(?:\s+as\s+([A-Za-z_]\w*))?").unwrap()
});
static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^from\s+([A-Za-z_][\w.]*)\s+import\s+(.+)").unwrap());
static CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z_][\w.]*)\s*\(").unwrap());

struct OpenDef {
    name: String,
    class_name: Option<String>,
    indent: usize,
    start: usize,
    signature: String,
    calls: Vec<(String, i64)>,
}

/// Line-oriented Python parser used when the AST is unavailable.
///
/// Tracks the indentation of `class` and `def` headers so method names come
/// out qualified exactly as the tree-sitter walker produces them.
pub fn parse_python_fallback(src: &str, path: &str, opts: &ParserOptions) -> ParsedFile {
    let mut out = ParsedFile::new(path);
    let lines: Vec<&str> = src.lines().collect();

    fn close_defs(
        defs: &mut Vec<OpenDef>,
        out: &mut ParsedFile,
        indent: usize,
        line_no: usize,
        lines: &[&str],
        opts: &ParserOptions,
    ) {
        while defs.last().map(|d| d.indent >= indent).unwrap_or(false) {
            let def = defs.pop().unwrap();
            push_fallback_function(out, def, line_no, lines, opts);
        }
    }

    let mut current_class: Option<(String, usize)> = None;
    let mut open_defs: Vec<OpenDef> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();

        if let Some(caps) = CLASS_RE.captures(line) {
            close_defs(&mut open_defs, &mut out, indent, i, &lines, opts);
            let name = caps[2].to_string();
            out.types.push(TypeEntity {
                id: TypeEntity::compute_id(path, &name, TypeKind::Class, i as i64 + 1),
                name: name.clone(),
                kind: TypeKind::Class,
                file_path: path.to_string(),
                start_line: i as i64 + 1,
                end_line: i as i64 + 1,
                code_text: line.trim().to_string(),
            });
            current_class = Some((name, indent));
            continue;
        }

        if let Some((_, class_indent)) = &current_class {
            if indent <= *class_indent {
                current_class = None;
            }
        }

        if let Some(caps) = DEF_RE.captures(line) {
            close_defs(&mut open_defs, &mut out, indent, i, &lines, opts);
            let bare = caps[2].to_string();
            let class_name = current_class
                .as_ref()
                .filter(|(_, ci)| indent > *ci)
                .map(|(c, _)| c.clone());
            let name = match &class_name {
                Some(class) => format!("{class}.{bare}"),
                None => bare,
            };
            open_defs.push(OpenDef {
                name,
                class_name,
                indent,
                start: i,
                signature: line.trim().trim_end_matches(':').to_string(),
                calls: Vec::new(),
            });
            continue;
        }

        if let Some(caps) = IMPORT_RE.captures(trimmed) {
            let alias = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            out.imports
                .push(ImportEntity::new(path, &caps[1], alias, i as i64 + 1));
            continue;
        }
        if let Some(caps) = FROM_IMPORT_RE.captures(trimmed) {
            let module = caps[1].to_string();
            for item in caps[2].split(',') {
                let item = item.trim();
                if item.is_empty() || item == "*" {
                    continue;
                }
                let (name, alias) = match item.split_once(" as ") {
                    Some((n, a)) => (n.trim(), a.trim()),
                    None => (item, item),
                };
                out.imports.push(ImportEntity::new(
                    path,
                    &format!("{module}.{name}"),
                    alias,
                    i as i64 + 1,
                ));
            }
            continue;
        }

        // Body line: harvest call sites for the innermost open def
        if let Some(def) = open_defs.last_mut() {
            if indent > def.indent {
                for caps in CALL_RE.captures_iter(trimmed) {
                    let name = caps[1].to_string();
                    let head = name.split('.').next().unwrap_or("");
                    if PY_DENYLIST.contains(head) || head == "def" || head == "class" {
                        continue;
                    }
                    def.calls.push((name, i as i64 + 1));
                }
            }
        }
    }
    close_defs(&mut open_defs, &mut out, 0, lines.len(), &lines, opts);

    out.finish();
    out
}

fn push_fallback_function(
    out: &mut ParsedFile,
    def: OpenDef,
    end: usize,
    lines: &[&str],
    opts: &ParserOptions,
) {
    let start = def.start;
    let end = end.max(start + 1);
    let body = lines[start..end.min(lines.len())].join("\n");
    let id = FunctionEntity::compute_id(
        out.path.as_str(),
        &def.name,
        &def.signature,
        start as i64 + 1,
        end as i64,
    );
    for (callee, line) in def.calls {
        out.raw_calls.push(RawCall {
            caller_id: id.clone(),
            caller_type: def.class_name.clone(),
            receiver_var: Some("self".to_string()),
            callee_name: callee,
            call_line: line,
        });
    }
    out.functions.push(FunctionEntity {
        id,
        name: def.name,
        signature: def.signature,
        file_path: out.path.clone(),
        start_line: start as i64 + 1,
        end_line: end as i64,
        start_col: 0,
        end_col: 0,
        code_text: truncate_code(&body, opts.max_code_text_bytes),
    });
}
