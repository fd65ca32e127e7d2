//! Go AST walker
//!
//! Beyond the common contract, Go extraction feeds interface-dispatch
//! resolution: struct fields are recorded with their normalized base type,
//! and interface method sets are collected so the ingestion batch can match
//! them against concrete method sets.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use tree_sitter::Node;

use super::{end_line, node_text, start_line, truncate_code, ParsedFile, ParserOptions, RawCall};
use crate::signature::normalize_type_name;
use crate::types::{FunctionEntity, ImportEntity, StructFieldEntity, TypeEntity, TypeKind};

static GO_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make",
        "max", "min", "new", "panic", "print", "println", "real", "recover",
    ]
    .into_iter()
    .collect()
});

#[derive(Clone, Default)]
struct Scope {
    caller_id: Option<String>,
    caller_type: Option<String>,
    receiver_var: Option<String>,
    /// Local variable name → base type, from composite-literal
    /// declarations in the enclosing body
    local_types: std::collections::HashMap<String, String>,
}

struct GoWalker<'a> {
    src: &'a str,
    path: &'a str,
    opts: &'a ParserOptions,
    out: ParsedFile,
    lambda_counter: usize,
}

pub(super) fn extract(
    root: Node,
    src: &str,
    path: &str,
    opts: &ParserOptions,
) -> ParsedFile {
    let mut walker = GoWalker {
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

impl<'a> GoWalker<'a> {
    fn walk(&mut self, node: Node, scope: &Scope) {
        match node.kind() {
            "import_declaration" => self.handle_imports(node),
            "function_declaration" => self.handle_function(node, None),
            "method_declaration" => self.handle_method(node),
            "type_declaration" => self.handle_type_declaration(node),
            "call_expression" => {
                self.handle_call(node, scope);
                self.walk_children(node, scope);
            }
            "func_literal" => self.handle_lambda(node, scope),
            _ => self.walk_children(node, scope),
        }
    }

    fn walk_children(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, scope);
        }
    }

    fn handle_imports(&mut self, node: Node) {
        let mut cursor = node.walk();
        let mut stack: Vec<Node> = node.children(&mut cursor).collect();
        while let Some(child) = stack.pop() {
            match child.kind() {
                "import_spec_list" => {
                    let mut inner = child.walk();
                    stack.extend(child.children(&mut inner));
                }
                "import_spec" => self.handle_import_spec(child),
                _ => {}
            }
        }
    }

    fn handle_import_spec(&mut self, spec: Node) {
        let path_node = match spec.child_by_field_name("path") {
            Some(n) => n,
            None => return,
        };
        let import_path = node_text(path_node, self.src).trim_matches('"').to_string();
        let alias = match spec.child_by_field_name("name") {
            Some(name) => {
                let text = node_text(name, self.src);
                // Blank imports carry no symbols
                if text == "_" {
                    return;
                }
                text.to_string()
            }
            None => String::new(),
        };
        self.out.imports.push(ImportEntity::new(
            self.path,
            &import_path,
            &alias,
            start_line(spec),
        ));
    }

    fn handle_function(&mut self, node: Node, qualifier: Option<(&str, &str)>) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let bare_name = node_text(name_node, self.src);
        let name = match qualifier {
            Some((type_name, _)) => format!("{type_name}.{bare_name}"),
            None => bare_name.to_string(),
        };
        let signature = self.signature_text(node);
        let entity = self.push_function(node, &name, &signature);

        let mut scope = Scope {
            caller_id: Some(entity),
            caller_type: qualifier.map(|(t, _)| t.to_string()),
            receiver_var: qualifier.and_then(|(_, v)| {
                if v.is_empty() {
                    None
                } else {
                    Some(v.to_string())
                }
            }),
            local_types: Default::default(),
        };
        if let Some(body) = node.child_by_field_name("body") {
            scope.local_types = self.collect_local_types(body);
            self.walk_children(body, &scope);
        }
    }

    /// Map local variables to their base types where the declaration
    /// makes the type syntactically evident (`x := T{}`, `x := &T{}`,
    /// `var x T`).
    fn collect_local_types(&self, body: Node) -> std::collections::HashMap<String, String> {
        let mut locals = std::collections::HashMap::new();
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            match node.kind() {
                "short_var_declaration" => {
                    let (Some(left), Some(right)) = (
                        node.child_by_field_name("left"),
                        node.child_by_field_name("right"),
                    ) else {
                        continue;
                    };
                    let names: Vec<&str> = left
                        .children(&mut left.walk())
                        .filter(|c| c.kind() == "identifier")
                        .map(|c| node_text(c, self.src))
                        .collect();
                    let types: Vec<Option<String>> = right
                        .children(&mut right.walk())
                        .filter(|c| c.is_named())
                        .map(|c| self.composite_literal_type(c))
                        .collect();
                    for (name, ty) in names.iter().zip(types) {
                        if let Some(ty) = ty {
                            locals.insert(name.to_string(), ty);
                        }
                    }
                }
                "var_declaration" => {
                    let mut cursor = node.walk();
                    for spec in node.children(&mut cursor) {
                        if spec.kind() != "var_spec" {
                            continue;
                        }
                        let Some(type_node) = spec.child_by_field_name("type") else {
                            continue;
                        };
                        let ty = normalize_type_name(node_text(type_node, self.src));
                        let mut name_cursor = spec.walk();
                        for part in spec.children(&mut name_cursor) {
                            if part.kind() == "identifier" {
                                locals.insert(node_text(part, self.src).to_string(), ty.clone());
                            }
                        }
                    }
                }
                // Nested function literals manage their own locals
                "func_literal" => continue,
                _ => {}
            }
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
        locals
    }

    /// `T{...}` or `&T{...}` on the right-hand side of a declaration
    fn composite_literal_type(&self, node: Node) -> Option<String> {
        let literal = match node.kind() {
            "composite_literal" => node,
            "unary_expression" => {
                let operand = node
                    .children(&mut node.walk())
                    .find(|c| c.kind() == "composite_literal")?;
                operand
            }
            _ => return None,
        };
        let type_node = literal.child_by_field_name("type")?;
        Some(normalize_type_name(node_text(type_node, self.src)))
    }

    fn handle_method(&mut self, node: Node) {
        let (receiver_type, receiver_var) = self
            .receiver_parts(node)
            .unwrap_or((String::new(), String::new()));
        if receiver_type.is_empty() {
            self.handle_function(node, None);
        } else {
            self.handle_function(node, Some((&receiver_type, &receiver_var)));
        }
    }

    fn receiver_parts(&self, node: Node) -> Option<(String, String)> {
        let receiver = node.child_by_field_name("receiver")?;
        let mut cursor = receiver.walk();
        let decl = receiver
            .children(&mut cursor)
            .find(|c| c.kind() == "parameter_declaration")?;
        let type_node = decl.child_by_field_name("type")?;
        let type_name = normalize_type_name(node_text(type_node, self.src));
        let var = decl
            .child_by_field_name("name")
            .map(|n| node_text(n, self.src).to_string())
            .unwrap_or_default();
        Some((type_name, var))
    }

    fn handle_type_declaration(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "type_spec" => self.handle_type_spec(child, false),
                "type_alias" => self.handle_type_spec(child, true),
                _ => {}
            }
        }
    }

    fn handle_type_spec(&mut self, spec: Node, is_alias: bool) {
        let name_node = match spec.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let name = node_text(name_node, self.src).to_string();
        let type_node = spec.child_by_field_name("type");

        let kind = if is_alias {
            TypeKind::TypeAlias
        } else {
            match type_node.map(|n| n.kind()) {
                Some("struct_type") => TypeKind::Struct,
                Some("interface_type") => TypeKind::Interface,
                _ => TypeKind::TypeAlias,
            }
        };

        let code = truncate_code(node_text(spec, self.src), self.opts.max_code_text_bytes);
        let entity = TypeEntity {
            id: TypeEntity::compute_id(self.path, &name, kind, start_line(spec)),
            name: name.clone(),
            kind,
            file_path: self.path.to_string(),
            start_line: start_line(spec),
            end_line: end_line(spec),
            code_text: code,
        };
        self.out.types.push(entity);

        match (kind, type_node) {
            (TypeKind::Struct, Some(body)) => self.collect_struct_fields(&name, body),
            (TypeKind::Interface, Some(body)) => self.collect_interface_methods(&name, body),
            _ => {}
        }
    }

    fn collect_struct_fields(&mut self, struct_name: &str, struct_type: Node) {
        let list = match struct_type
            .children(&mut struct_type.walk())
            .find(|c| c.kind() == "field_declaration_list")
        {
            Some(l) => l,
            None => return,
        };
        let mut cursor = list.walk();
        for decl in list.children(&mut cursor) {
            if decl.kind() != "field_declaration" {
                continue;
            }
            let type_node = match decl.child_by_field_name("type") {
                Some(t) => t,
                None => continue,
            };
            let field_type = normalize_type_name(node_text(type_node, self.src));
            let mut name_cursor = decl.walk();
            for part in decl.children(&mut name_cursor) {
                if part.kind() == "field_identifier" {
                    self.out.fields.push(StructFieldEntity::new(
                        struct_name,
                        node_text(part, self.src),
                        &field_type,
                        self.path,
                        start_line(decl),
                    ));
                }
            }
        }
    }

    fn collect_interface_methods(&mut self, interface_name: &str, interface_type: Node) {
        let mut methods = Vec::new();
        let mut cursor = interface_type.walk();
        let mut stack: Vec<Node> = interface_type.children(&mut cursor).collect();
        while let Some(node) = stack.pop() {
            match node.kind() {
                "method_elem" | "method_spec" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        methods.push(node_text(name, self.src).to_string());
                    }
                }
                _ => {
                    let mut inner = node.walk();
                    stack.extend(node.children(&mut inner));
                }
            }
        }
        if !methods.is_empty() {
            self.out
                .interface_methods
                .insert(interface_name.to_string(), methods);
        }
    }

    fn handle_call(&mut self, node: Node, scope: &Scope) {
        let caller_id = match &scope.caller_id {
            Some(id) => id.clone(),
            // Calls outside any function body (var initializers) are not
            // edges in the graph
            None => return,
        };
        let function = match node.child_by_field_name("function") {
            Some(f) => f,
            None => return,
        };
        let callee_name = match function.kind() {
            "identifier" => {
                let text = node_text(function, self.src);
                if GO_BUILTINS.contains(text) {
                    return;
                }
                text.to_string()
            }
            "selector_expression" => {
                let text = node_text(function, self.src);
                // A call through a typed local (`b.Build()` after
                // `b := Builder{}`) is rewritten to its qualified form
                match text.split_once('.') {
                    Some((head, rest)) if !rest.contains('.') => {
                        match scope.local_types.get(head) {
                            Some(ty) => format!("{ty}.{rest}"),
                            None => text.to_string(),
                        }
                    }
                    _ => text.to_string(),
                }
            }
            _ => return,
        };
        self.out.raw_calls.push(RawCall {
            caller_id,
            caller_type: scope.caller_type.clone(),
            receiver_var: scope.receiver_var.clone(),
            callee_name,
            call_line: start_line(node),
        });
    }

    fn handle_lambda(&mut self, node: Node, scope: &Scope) {
        self.lambda_counter += 1;
        let name = format!("$lambda_{}", self.lambda_counter);
        let signature = truncate_code(node_text(node, self.src), 120);
        let lambda_id = self.push_function(node, &name, &signature);

        let mut scope = Scope {
            caller_id: Some(lambda_id),
            caller_type: scope.caller_type.clone(),
            receiver_var: scope.receiver_var.clone(),
            local_types: Default::default(),
        };
        if let Some(body) = node.child_by_field_name("body") {
            scope.local_types = self.collect_local_types(body);
            self.walk_children(body, &scope);
        }
    }

    /// Declaration text up to the body brace
    fn signature_text(&self, node: Node) -> String {
        let start = node.start_byte();
        let end = node
            .child_by_field_name("body")
            .map(|b| b.start_byte())
            .unwrap_or_else(|| node.end_byte());
        self.src[start..end].trim().to_string()
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

#[cfg(test)]
mod tests {
    use crate::parsing::{CodeParser, ParserOptions};

    fn parse(source: &str) -> crate::parsing::ParsedFile {
        let mut parser = CodeParser::new(ParserOptions::default());
        parser.parse_file(source, "pkg/sample.go").unwrap()
    }

    #[test]
    fn same_file_call_resolves_to_edge() {
        let parsed = parse("package p\nfunc A() { B() }\nfunc B() {}\n");
        assert_eq!(parsed.functions.len(), 2);
        assert_eq!(parsed.call_edges.len(), 1);
        assert!(parsed.unresolved_calls.is_empty());

        let a = parsed.functions.iter().find(|f| f.name == "A").unwrap();
        let b = parsed.functions.iter().find(|f| f.name == "B").unwrap();
        assert_eq!(parsed.call_edges[0].caller_id, a.id);
        assert_eq!(parsed.call_edges[0].callee_id, b.id);
    }

    #[test]
    fn methods_are_qualified_with_receiver_type() {
        let parsed = parse(
            "package p\ntype Server struct{}\nfunc (s *Server) Run() { s.setup() }\nfunc (s *Server) setup() {}\n",
        );
        let names: Vec<&str> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Server.Run"));
        assert!(names.contains(&"Server.setup"));
        // s.setup() resolves against the sibling method in-file
        assert_eq!(parsed.call_edges.len(), 1);
    }

    #[test]
    fn struct_fields_carry_normalized_types() {
        let parsed = parse(
            "package p\ntype Builder struct {\n\tw *bytes.Buffer\n\titems []Item\n\tfn func(int)\n}\n",
        );
        let by_name: std::collections::HashMap<_, _> = parsed
            .fields
            .iter()
            .map(|f| (f.field_name.as_str(), f.field_type.as_str()))
            .collect();
        assert_eq!(by_name["w"], "Buffer");
        assert_eq!(by_name["items"], "Item");
        assert_eq!(by_name["fn"], "func");
    }

    #[test]
    fn interface_method_sets_are_collected() {
        let parsed = parse(
            "package p\ntype Writer interface {\n\tWrite(b []byte) error\n\tClose() error\n}\n",
        );
        assert_eq!(parsed.types.len(), 1);
        assert_eq!(parsed.types[0].kind, crate::types::TypeKind::Interface);
        let methods = &parsed.interface_methods["Writer"];
        assert!(methods.contains(&"Write".to_string()));
        assert!(methods.contains(&"Close".to_string()));
    }

    #[test]
    fn imports_skip_blank_and_keep_dot() {
        let parsed = parse(
            "package p\nimport (\n\t\"fmt\"\n\tlog \"github.com/rs/zerolog\"\n\t_ \"net/http/pprof\"\n\t. \"math\"\n)\n",
        );
        let aliases: Vec<(&str, &str)> = parsed
            .imports
            .iter()
            .map(|i| (i.import_path.as_str(), i.alias.as_str()))
            .collect();
        assert!(aliases.contains(&("fmt", "")));
        assert!(aliases.contains(&("github.com/rs/zerolog", "log")));
        assert!(aliases.contains(&("math", ".")));
        assert!(!aliases.iter().any(|(p, _)| *p == "net/http/pprof"));
    }

    #[test]
    fn qualified_calls_stay_verbatim_for_the_resolver() {
        let parsed = parse(
            "package p\nimport \"fmt\"\nfunc Greet() { fmt.Println(\"hi\") }\n",
        );
        assert_eq!(parsed.unresolved_calls.len(), 1);
        assert_eq!(parsed.unresolved_calls[0].callee_name, "fmt.Println");
    }

    #[test]
    fn builtins_are_not_call_sites() {
        let parsed = parse("package p\nfunc F(xs []int) int { return len(xs) }\n");
        assert!(parsed.unresolved_calls.is_empty());
        assert!(parsed.call_edges.is_empty());
    }

    #[test]
    fn lambdas_get_synthetic_names() {
        let parsed = parse(
            "package p\nfunc Outer() {\n\tgo func() { helper() }()\n}\nfunc helper() {}\n",
        );
        assert!(parsed.functions.iter().any(|f| f.name == "$lambda_1"));
        // The call inside the lambda attributes to the lambda itself
        let lambda = parsed.functions.iter().find(|f| f.name == "$lambda_1").unwrap();
        assert!(parsed
            .call_edges
            .iter()
            .any(|e| e.caller_id == lambda.id));
    }

    #[test]
    fn field_dispatch_chain_is_preserved() {
        let parsed = parse(
            "package p\ntype Builder struct { w Writer }\nfunc (b Builder) Build() { b.w.Write(nil) }\ntype Writer interface { Write(b []byte) }\n",
        );
        assert_eq!(parsed.unresolved_calls.len(), 1);
        assert_eq!(parsed.unresolved_calls[0].callee_name, "b.w.Write");
    }
}
