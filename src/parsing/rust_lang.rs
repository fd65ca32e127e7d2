//! Rust AST walker
//!
//! Traits are types of kind `interface`; `impl Trait for Type` blocks are
//! recorded directly as implements edges, and trait method sets feed the
//! same dispatch machinery as Go interfaces. Scoped paths are normalized to
//! dotted form so the resolver sees one qualified-call syntax.

use tree_sitter::Node;

use super::{end_line, node_text, start_line, truncate_code, ParsedFile, ParserOptions, RawCall};
use crate::signature::normalize_type_name;
use crate::types::{
    FunctionEntity, ImplementsEdge, ImportEntity, StructFieldEntity, TypeEntity, TypeKind,
};

#[derive(Clone, Default)]
struct Scope {
    caller_id: Option<String>,
    impl_type: Option<String>,
}

struct RustWalker<'a> {
    src: &'a str,
    path: &'a str,
    opts: &'a ParserOptions,
    out: ParsedFile,
    lambda_counter: usize,
}

pub(super) fn extract(root: Node, src: &str, path: &str, opts: &ParserOptions) -> ParsedFile {
    let mut walker = RustWalker {
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

impl<'a> RustWalker<'a> {
    fn walk(&mut self, node: Node, scope: &Scope) {
        match node.kind() {
            "function_item" => self.handle_function(node, scope),
            "impl_item" => self.handle_impl(node),
            "struct_item" => self.handle_struct(node),
            "enum_item" => self.handle_named_type(node, TypeKind::Enum),
            "trait_item" => self.handle_trait(node),
            "type_item" => self.handle_named_type(node, TypeKind::TypeAlias),
            "use_declaration" => self.handle_use(node),
            "call_expression" => {
                self.handle_call(node, scope);
                self.walk_children(node, scope);
            }
            "closure_expression" => self.handle_closure(node, scope),
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
        let name = match &scope.impl_type {
            Some(ty) => format!("{ty}.{bare}"),
            None => bare.to_string(),
        };
        let signature = self.signature_text(node);
        let id = self.push_function(node, &name, &signature);
        let inner = Scope {
            caller_id: Some(id),
            impl_type: scope.impl_type.clone(),
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &inner);
        }
    }

    fn handle_impl(&mut self, node: Node) {
        let type_name = node
            .child_by_field_name("type")
            .map(|t| base_type_name(node_text(t, self.src)))
            .unwrap_or_default();
        if let Some(trait_node) = node.child_by_field_name("trait") {
            let trait_name = base_type_name(node_text(trait_node, self.src));
            if !type_name.is_empty() && !trait_name.is_empty() {
                self.out
                    .implements
                    .push(ImplementsEdge::new(&type_name, &trait_name, self.path));
            }
        }
        let scope = Scope {
            caller_id: None,
            impl_type: if type_name.is_empty() {
                None
            } else {
                Some(type_name)
            },
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &scope);
        }
    }

    fn handle_struct(&mut self, node: Node) {
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.src).to_string(),
            None => return,
        };
        self.push_type(node, &name, TypeKind::Struct);

        if let Some(body) = node.child_by_field_name("body") {
            if body.kind() == "field_declaration_list" {
                let mut cursor = body.walk();
                for decl in body.children(&mut cursor) {
                    if decl.kind() != "field_declaration" {
                        continue;
                    }
                    let (Some(field_name), Some(field_type)) = (
                        decl.child_by_field_name("name"),
                        decl.child_by_field_name("type"),
                    ) else {
                        continue;
                    };
                    self.out.fields.push(StructFieldEntity::new(
                        &name,
                        node_text(field_name, self.src),
                        &base_type_name(node_text(field_type, self.src)),
                        self.path,
                        start_line(decl),
                    ));
                }
            }
        }
    }

    fn handle_trait(&mut self, node: Node) {
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.src).to_string(),
            None => return,
        };
        self.push_type(node, &name, TypeKind::Interface);

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() == "function_item" || member.kind() == "function_signature_item"
                {
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

    fn handle_named_type(&mut self, node: Node, kind: TypeKind) {
        if let Some(name_node) = node.child_by_field_name("name") {
            let name = node_text(name_node, self.src).to_string();
            self.push_type(node, &name, kind);
        }
    }

    fn handle_use(&mut self, node: Node) {
        let argument = match node.child_by_field_name("argument") {
            Some(a) => a,
            None => return,
        };
        match argument.kind() {
            "use_as_clause" => {
                let path = argument
                    .child_by_field_name("path")
                    .map(|p| node_text(p, self.src))
                    .unwrap_or_default();
                let alias = argument
                    .child_by_field_name("alias")
                    .map(|a| node_text(a, self.src))
                    .unwrap_or_default();
                self.push_import(path, alias, start_line(node));
            }
            _ => {
                let text = node_text(argument, self.src);
                self.push_import(text, "", start_line(node));
            }
        }
    }

    fn push_import(&mut self, path: &str, alias: &str, line: i64) {
        if path.is_empty() {
            return;
        }
        let dotted = path.replace("::", ".");
        self.out
            .imports
            .push(ImportEntity::new(self.path, &dotted, alias, line));
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
            "scoped_identifier" => node_text(function, self.src).replace("::", "."),
            "field_expression" => node_text(function, self.src).replace("::", "."),
            _ => return,
        };
        self.out.raw_calls.push(RawCall {
            caller_id,
            caller_type: scope.impl_type.clone(),
            receiver_var: scope.impl_type.as_ref().map(|_| "self".to_string()),
            callee_name,
            call_line: start_line(node),
        });
    }

    fn handle_closure(&mut self, node: Node, scope: &Scope) {
        self.lambda_counter += 1;
        let name = format!("$lambda_{}", self.lambda_counter);
        let signature = truncate_code(node_text(node, self.src), 120);
        let id = self.push_function(node, &name, &signature);
        let inner = Scope {
            caller_id: Some(id),
            impl_type: scope.impl_type.clone(),
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

    fn push_type(&mut self, node: Node, name: &str, kind: TypeKind) {
        self.out.types.push(TypeEntity {
            id: TypeEntity::compute_id(self.path, name, kind, start_line(node)),
            name: name.to_string(),
            kind,
            file_path: self.path.to_string(),
            start_line: start_line(node),
            end_line: end_line(node),
            code_text: truncate_code(node_text(node, self.src), self.opts.max_code_text_bytes),
        });
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

/// Base identifier of a Rust type expression: references, lifetimes,
/// mutability, `dyn`, and the common smart-pointer wrappers are peeled
/// before the Go-style normalization applies.
fn base_type_name(raw: &str) -> String {
    let mut s = raw.trim();
    loop {
        let before = s;
        s = s.trim_start_matches('&').trim_start();
        if s.starts_with('\'') {
            if let Some(space) = s.find(' ') {
                s = s[space + 1..].trim_start();
            }
        }
        for prefix in ["mut ", "dyn ", "impl "] {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.trim_start();
            }
        }
        if s == before {
            break;
        }
    }
    for wrapper in ["Box", "Arc", "Rc", "RefCell", "Mutex", "RwLock", "Option", "Vec"] {
        if let Some(rest) = s.strip_prefix(wrapper) {
            if let Some(inner) = rest.trim_start().strip_prefix('<') {
                let inner = inner.strip_suffix('>').unwrap_or(inner);
                return base_type_name(inner);
            }
        }
    }
    let dotted = s.replace("::", ".");
    normalize_type_name(&dotted)
}
