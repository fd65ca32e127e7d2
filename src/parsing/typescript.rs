//! TypeScript / JavaScript AST walker
//!
//! Classes become types of kind `class`; TS `interface` and `type` aliases
//! become kinds `interface` and `type_alias`. Explicit `implements` clauses
//! are recorded directly as implements edges.

use tree_sitter::Node;

use super::{end_line, node_text, start_line, truncate_code, ParsedFile, ParserOptions, RawCall};
use crate::signature::normalize_type_name;
use crate::types::{
    FunctionEntity, ImplementsEdge, ImportEntity, StructFieldEntity, TypeEntity, TypeKind,
};

#[derive(Clone, Default)]
struct Scope {
    caller_id: Option<String>,
    class_name: Option<String>,
}

struct TsWalker<'a> {
    src: &'a str,
    path: &'a str,
    opts: &'a ParserOptions,
    out: ParsedFile,
    lambda_counter: usize,
}

pub(super) fn extract(root: Node, src: &str, path: &str, opts: &ParserOptions) -> ParsedFile {
    let mut walker = TsWalker {
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

impl<'a> TsWalker<'a> {
    fn walk(&mut self, node: Node, scope: &Scope) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.handle_function(node, scope)
            }
            "class_declaration" => self.handle_class(node),
            "abstract_class_declaration" => self.handle_class(node),
            "interface_declaration" => self.handle_interface(node),
            "type_alias_declaration" => self.handle_simple_type(node, TypeKind::TypeAlias),
            "enum_declaration" => self.handle_simple_type(node, TypeKind::Enum),
            "import_statement" => self.handle_import(node),
            "variable_declarator" => self.handle_declarator(node, scope),
            "call_expression" => {
                self.handle_call(node, scope);
                self.walk_children(node, scope);
            }
            "arrow_function" | "function_expression" => self.handle_lambda(node, scope),
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
        let name = node_text(name_node, self.src).to_string();
        let signature = self.signature_text(node);
        let id = self.push_function(node, &name, &signature);
        let inner = Scope {
            caller_id: Some(id),
            class_name: scope.class_name.clone(),
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &inner);
        }
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

        self.collect_implements(node, &name);

        let scope = Scope {
            caller_id: None,
            class_name: Some(name),
        };
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                match member.kind() {
                    "method_definition" => self.handle_method(member, &scope),
                    "public_field_definition" | "field_definition" => {
                        self.handle_class_field(member, &scope)
                    }
                    _ => {}
                }
            }
        }
    }

    /// `class X implements A, B` yields one implements edge per interface
    fn collect_implements(&mut self, node: Node, class_name: &str) {
        let mut cursor = node.walk();
        let heritage = node
            .children(&mut cursor)
            .find(|c| c.kind() == "class_heritage");
        let heritage = match heritage {
            Some(h) => h,
            None => return,
        };
        let mut stack = vec![heritage];
        while let Some(current) = stack.pop() {
            if current.kind() == "implements_clause" {
                let mut inner = current.walk();
                for ty in current.children(&mut inner) {
                    if ty.kind() == "type_identifier" || ty.kind() == "identifier" {
                        self.out.implements.push(ImplementsEdge::new(
                            class_name,
                            node_text(ty, self.src),
                            self.path,
                        ));
                    }
                }
            } else {
                let mut inner = current.walk();
                stack.extend(current.children(&mut inner));
            }
        }
    }

    fn handle_method(&mut self, node: Node, scope: &Scope) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let class = scope.class_name.clone().unwrap_or_default();
        let bare = node_text(name_node, self.src);
        let name = format!("{class}.{bare}");
        let signature = self.signature_text(node);
        let id = self.push_function(node, &name, &signature);
        let inner = Scope {
            caller_id: Some(id),
            class_name: scope.class_name.clone(),
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &inner);
        }
    }

    fn handle_class_field(&mut self, node: Node, scope: &Scope) {
        let class = match &scope.class_name {
            Some(c) => c.clone(),
            None => return,
        };
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let field_type = node
            .child_by_field_name("type")
            .map(|t| {
                normalize_type_name(node_text(t, self.src).trim_start_matches(':').trim())
            })
            .unwrap_or_default();
        self.out.fields.push(StructFieldEntity::new(
            &class,
            node_text(name_node, self.src),
            &field_type,
            self.path,
            start_line(node),
        ));
        // Field initializers can hold lambdas and calls
        if let Some(value) = node.child_by_field_name("value") {
            let scope = scope.clone();
            self.walk(value, &scope);
        }
    }

    fn handle_interface(&mut self, node: Node) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let name = node_text(name_node, self.src).to_string();
        self.out.types.push(TypeEntity {
            id: TypeEntity::compute_id(self.path, &name, TypeKind::Interface, start_line(node)),
            name: name.clone(),
            kind: TypeKind::Interface,
            file_path: self.path.to_string(),
            start_line: start_line(node),
            end_line: end_line(node),
            code_text: truncate_code(node_text(node, self.src), self.opts.max_code_text_bytes),
        });

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() == "method_signature" {
                    if let Some(method_name) = member.child_by_field_name("name") {
                        methods.push(node_text(method_name, self.src).to_string());
                    }
                }
            }
        }
        if !methods.is_empty() {
            self.out.interface_methods.insert(name, methods);
        }
    }

    fn handle_simple_type(&mut self, node: Node, kind: TypeKind) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let name = node_text(name_node, self.src).to_string();
        self.out.types.push(TypeEntity {
            id: TypeEntity::compute_id(self.path, &name, kind, start_line(node)),
            name,
            kind,
            file_path: self.path.to_string(),
            start_line: start_line(node),
            end_line: end_line(node),
            code_text: truncate_code(node_text(node, self.src), self.opts.max_code_text_bytes),
        });
    }

    fn handle_import(&mut self, node: Node) {
        let source = match node.child_by_field_name("source") {
            Some(s) => node_text(s, self.src).trim_matches(|c| c == '"' || c == '\'').to_string(),
            None => return,
        };
        // Default or namespace alias when present; bare side-effect imports
        // keep an empty alias
        let mut alias = String::new();
        let mut cursor = node.walk();
        let mut stack: Vec<Node> = node.children(&mut cursor).collect();
        while let Some(current) = stack.pop() {
            match current.kind() {
                "identifier" => {
                    alias = node_text(current, self.src).to_string();
                    break;
                }
                "import_clause" | "namespace_import" => {
                    let mut inner = current.walk();
                    stack.extend(current.children(&mut inner));
                }
                _ => {}
            }
        }
        self.out
            .imports
            .push(ImportEntity::new(self.path, &source, &alias, start_line(node)));
    }

    /// `const f = () => ...` registers a named function instead of a lambda
    fn handle_declarator(&mut self, node: Node, scope: &Scope) {
        let value = node.child_by_field_name("value");
        let is_function = matches!(
            value.map(|v| v.kind()),
            Some("arrow_function") | Some("function_expression")
        );
        if !is_function {
            self.walk_children(node, scope);
            return;
        }
        let name_node = match node.child_by_field_name("name") {
            Some(n) if n.kind() == "identifier" => n,
            _ => {
                self.walk_children(node, scope);
                return;
            }
        };
        let value = value.unwrap();
        let name = node_text(name_node, self.src).to_string();
        let signature = self.signature_text(value);
        let id = self.push_function(value, &name, &signature);
        let inner = Scope {
            caller_id: Some(id),
            class_name: scope.class_name.clone(),
        };
        if let Some(body) = value.child_by_field_name("body") {
            self.walk(body, &inner);
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
            "identifier" => node_text(function, self.src).to_string(),
            "member_expression" => node_text(function, self.src).to_string(),
            _ => return,
        };
        self.out.raw_calls.push(RawCall {
            caller_id,
            caller_type: scope.class_name.clone(),
            receiver_var: scope.class_name.as_ref().map(|_| "this".to_string()),
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
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body, &inner);
        }
    }

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
    use crate::parsing::{CodeParser, ParsedFile, ParserOptions};
    use crate::types::TypeKind;

    fn parse_ts(source: &str) -> ParsedFile {
        let mut parser = CodeParser::new(ParserOptions::default());
        parser.parse_file(source, "src/service.ts").unwrap()
    }

    fn parse_js(source: &str) -> ParsedFile {
        let mut parser = CodeParser::new(ParserOptions::default());
        parser.parse_file(source, "src/service.js").unwrap()
    }

    #[test]
    fn classes_interfaces_and_aliases_get_their_kinds() {
        let parsed = parse_ts(
            "interface Store { get(key: string): string; }\n\
             class MemoryStore implements Store {\n  get(key: string): string { return ''; }\n}\n\
             type Key = string;\nenum Mode { A, B }\n",
        );
        let kinds: Vec<(&str, TypeKind)> = parsed
            .types
            .iter()
            .map(|t| (t.name.as_str(), t.kind))
            .collect();
        assert!(kinds.contains(&("Store", TypeKind::Interface)));
        assert!(kinds.contains(&("MemoryStore", TypeKind::Class)));
        assert!(kinds.contains(&("Key", TypeKind::TypeAlias)));
        assert!(kinds.contains(&("Mode", TypeKind::Enum)));
    }

    #[test]
    fn implements_clause_is_recorded() {
        let parsed = parse_ts(
            "interface Store { get(key: string): string; }\n\
             class MemoryStore implements Store {\n  get(key: string): string { return ''; }\n}\n",
        );
        assert_eq!(parsed.implements.len(), 1);
        assert_eq!(parsed.implements[0].type_name, "MemoryStore");
        assert_eq!(parsed.implements[0].interface_name, "Store");
    }

    #[test]
    fn methods_are_qualified_and_this_calls_resolve() {
        let parsed = parse_ts(
            "class Runner {\n  run() { this.step(); }\n  step() {}\n}\n",
        );
        let names: Vec<&str> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Runner.run"));
        assert!(names.contains(&"Runner.step"));
        assert_eq!(parsed.call_edges.len(), 1);
    }

    #[test]
    fn arrow_assigned_to_const_is_a_named_function() {
        let parsed = parse_js(
            "const handler = (req) => { dispatch(req); };\nfunction dispatch(req) {}\n",
        );
        let names: Vec<&str> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"handler"));
        assert!(names.contains(&"dispatch"));
        assert_eq!(parsed.call_edges.len(), 1, "handler -> dispatch resolves in-file");
    }

    #[test]
    fn anonymous_callbacks_become_lambdas() {
        let parsed = parse_js("function outer(xs) { xs.forEach(function (x) { inner(x); }); }\nfunction inner(x) {}\n");
        assert!(parsed.functions.iter().any(|f| f.name.starts_with("$lambda_")));
    }

    #[test]
    fn imports_capture_source_and_alias() {
        let parsed = parse_ts(
            "import fs from \"fs\";\nimport * as path from \"path\";\nimport { join } from \"path\";\nimport \"./side-effect\";\n",
        );
        assert_eq!(parsed.imports.len(), 4);
        assert!(parsed
            .imports
            .iter()
            .any(|i| i.import_path == "fs" && i.alias == "fs"));
        assert!(parsed
            .imports
            .iter()
            .any(|i| i.import_path == "path" && i.alias == "path"));
        assert!(parsed
            .imports
            .iter()
            .any(|i| i.import_path == "./side-effect" && i.alias.is_empty()));
    }

    #[test]
    fn interface_method_sets_feed_dispatch() {
        let parsed = parse_ts("interface Codec { encode(v: string): string; decode(v: string): string; }\n");
        let methods = &parsed.interface_methods["Codec"];
        assert_eq!(methods.len(), 2);
    }

    #[test]
    fn class_fields_carry_normalized_types() {
        let parsed = parse_ts(
            "class Service {\n  store: Store;\n  retries: number;\n  run() {}\n}\n",
        );
        let by_name: std::collections::HashMap<_, _> = parsed
            .fields
            .iter()
            .map(|f| (f.field_name.as_str(), f.field_type.as_str()))
            .collect();
        assert_eq!(by_name["store"], "Store");
        assert_eq!(by_name["retries"], "number");
    }
}
