//! Java AST walker
//!
//! Classes and interfaces map onto the shared type model; `implements`
//! clauses are recorded directly, class fields feed dispatch with their
//! normalized types, and method names are qualified with the enclosing
//! class.

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

struct JavaWalker<'a> {
    src: &'a str,
    path: &'a str,
    opts: &'a ParserOptions,
    out: ParsedFile,
    lambda_counter: usize,
}

pub(super) fn extract(root: Node, src: &str, path: &str, opts: &ParserOptions) -> ParsedFile {
    let mut walker = JavaWalker {
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

impl<'a> JavaWalker<'a> {
    fn walk(&mut self, node: Node, scope: &Scope) {
        match node.kind() {
            "class_declaration" => self.handle_class(node),
            "interface_declaration" => self.handle_interface(node),
            "enum_declaration" => self.handle_enum(node),
            "import_declaration" => self.handle_import(node),
            "method_declaration" | "constructor_declaration" => {
                self.handle_method(node, scope)
            }
            "field_declaration" => self.handle_field(node, scope),
            "method_invocation" => {
                self.handle_invocation(node, scope);
                self.walk_children(node, scope);
            }
            "lambda_expression" => self.handle_lambda(node, scope),
            _ => self.walk_children(node, scope),
        }
    }

    fn walk_children(&mut self, node: Node, scope: &Scope) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, scope);
        }
    }

    fn handle_class(&mut self, node: Node) {
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.src).to_string(),
            None => return,
        };
        self.push_type(node, &name, TypeKind::Class);

        // `implements A, B` on the declaration
        if let Some(interfaces) = node.child_by_field_name("interfaces") {
            let mut stack = vec![interfaces];
            while let Some(current) = stack.pop() {
                if current.kind() == "type_identifier" {
                    self.out.implements.push(ImplementsEdge::new(
                        &name,
                        node_text(current, self.src),
                        self.path,
                    ));
                } else {
                    let mut inner = current.walk();
                    stack.extend(current.children(&mut inner));
                }
            }
        }

        let scope = Scope {
            caller_id: None,
            class_name: Some(name),
        };
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_children(body, &scope);
        }
    }

    fn handle_interface(&mut self, node: Node) {
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.src).to_string(),
            None => return,
        };
        self.push_type(node, &name, TypeKind::Interface);

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() == "method_declaration" {
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

    fn handle_enum(&mut self, node: Node) {
        if let Some(name_node) = node.child_by_field_name("name") {
            let name = node_text(name_node, self.src).to_string();
            self.push_type(node, &name, TypeKind::Enum);
        }
    }

    fn handle_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        let path_node = node
            .children(&mut cursor)
            .find(|c| c.kind() == "scoped_identifier" || c.kind() == "identifier");
        if let Some(path_node) = path_node {
            let path = node_text(path_node, self.src).to_string();
            let alias = path.rsplit('.').next().unwrap_or("").to_string();
            self.out
                .imports
                .push(ImportEntity::new(self.path, &path, &alias, start_line(node)));
        }
    }

    fn handle_method(&mut self, node: Node, scope: &Scope) {
        let name_node = match node.child_by_field_name("name") {
            Some(n) => n,
            None => return,
        };
        let bare = node_text(name_node, self.src);
        let name = match &scope.class_name {
            Some(class) => format!("{class}.{bare}"),
            None => bare.to_string(),
        };
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

    fn handle_field(&mut self, node: Node, scope: &Scope) {
        let class = match &scope.class_name {
            Some(c) => c.clone(),
            None => return,
        };
        let field_type = node
            .child_by_field_name("type")
            .map(|t| normalize_type_name(node_text(t, self.src)))
            .unwrap_or_default();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "variable_declarator" {
                if let Some(name_node) = child.child_by_field_name("name") {
                    self.out.fields.push(StructFieldEntity::new(
                        &class,
                        node_text(name_node, self.src),
                        &field_type,
                        self.path,
                        start_line(node),
                    ));
                }
            }
        }
    }

    fn handle_invocation(&mut self, node: Node, scope: &Scope) {
        let caller_id = match &scope.caller_id {
            Some(id) => id.clone(),
            None => return,
        };
        let name = match node.child_by_field_name("name") {
            Some(n) => node_text(n, self.src),
            None => return,
        };
        let callee_name = match node.child_by_field_name("object") {
            Some(object) => format!("{}.{}", node_text(object, self.src), name),
            None => name.to_string(),
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

#[cfg(test)]
mod tests {
    use crate::parsing::{CodeParser, ParsedFile, ParserOptions};
    use crate::types::TypeKind;

    fn parse(source: &str) -> ParsedFile {
        let mut parser = CodeParser::new(ParserOptions::default());
        parser.parse_file(source, "src/Worker.java").unwrap()
    }

    const SAMPLE: &str = r#"
import java.util.List;

interface Task {
    void execute();
}

public class Worker implements Task {
    private List queue;
    private Logger logger;

    public void execute() {
        this.drain();
    }

    private void drain() {
        logger.info("draining");
    }
}
"#;

    #[test]
    fn classes_and_interfaces_extracted() {
        let parsed = parse(SAMPLE);
        assert!(parsed
            .types
            .iter()
            .any(|t| t.name == "Task" && t.kind == TypeKind::Interface));
        assert!(parsed
            .types
            .iter()
            .any(|t| t.name == "Worker" && t.kind == TypeKind::Class));
    }

    #[test]
    fn implements_clause_recorded() {
        let parsed = parse(SAMPLE);
        assert_eq!(parsed.implements.len(), 1);
        assert_eq!(parsed.implements[0].type_name, "Worker");
        assert_eq!(parsed.implements[0].interface_name, "Task");
    }

    #[test]
    fn methods_qualified_and_this_calls_resolve() {
        let parsed = parse(SAMPLE);
        let names: Vec<&str> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Worker.execute"));
        assert!(names.contains(&"Worker.drain"));
        // this.drain() resolves to the sibling method
        assert_eq!(parsed.call_edges.len(), 1);
        // logger.info stays for the resolver
        assert!(parsed
            .unresolved_calls
            .iter()
            .any(|c| c.callee_name == "logger.info"));
    }

    #[test]
    fn fields_keep_normalized_types() {
        let parsed = parse(SAMPLE);
        let by_name: std::collections::HashMap<_, _> = parsed
            .fields
            .iter()
            .map(|f| (f.field_name.as_str(), f.field_type.as_str()))
            .collect();
        assert_eq!(by_name["queue"], "List");
        assert_eq!(by_name["logger"], "Logger");
    }

    #[test]
    fn imports_alias_to_last_segment() {
        let parsed = parse(SAMPLE);
        assert!(parsed
            .imports
            .iter()
            .any(|i| i.import_path == "java.util.List" && i.alias == "List"));
    }

    #[test]
    fn interface_method_sets_collected() {
        let parsed = parse(SAMPLE);
        assert_eq!(parsed.interface_methods["Task"], vec!["execute".to_string()]);
    }
}
