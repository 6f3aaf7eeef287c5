//! Structural extraction of TypeScript/JavaScript files.
//!
//! One pass over the module's top-level statements produces an
//! [`AstSnapshot`]: declarations (functions, function-valued variables,
//! classes, interfaces, type aliases, enums, exported variables), imports and
//! exports. Syntax errors never abort extraction; they are recorded in
//! `parse_errors` next to whatever could still be recovered.

use std::path::Path;

use tree_sitter::Node;

use crate::error::Result;
use crate::index::{
    keys, read_json, write_json, AstNode, AstSnapshot, BlobStore, ExportInfo, ExportKind,
    ImportInfo, NodeKind, Parameter, ParseError, SourceLocation,
};
use crate::indexer::parser::{ParsedFile, SourceParser};
use crate::languages::LanguageRegistry;

const MAX_PARSE_ERRORS: usize = 20;

pub struct AstExtractor {
    parser: SourceParser,
}

impl AstExtractor {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self {
            parser: SourceParser::new(registry),
        }
    }

    /// Extracts a snapshot from in-memory source. Never fails.
    pub fn extract_source(&self, file_path: &str, hash: &str, source: &str) -> AstSnapshot {
        if !self.parser.supports(file_path) {
            let mut snapshot = AstSnapshot::empty(file_path, hash);
            snapshot
                .parse_errors
                .push(ParseError::new(format!("No parser available for {}", file_path)));
            return snapshot;
        }

        match self.parser.parse(file_path, source) {
            Ok(parsed) => Collector::new(&parsed, file_path, hash).run(),
            Err(e) => {
                tracing::warn!("Parser unavailable for {}: {}", file_path, e);
                let mut snapshot = AstSnapshot::empty(file_path, hash);
                snapshot.parse_errors.push(ParseError::new(e.to_string()));
                snapshot
            }
        }
    }

    /// Reads `root/rel_path` and extracts it; unreadable files yield an
    /// empty snapshot carrying the read error
    pub fn extract_file(&self, root: &Path, rel_path: &str, hash: &str) -> AstSnapshot {
        match std::fs::read_to_string(root.join(rel_path)) {
            Ok(source) => self.extract_source(rel_path, hash, &source),
            Err(e) => {
                let mut snapshot = AstSnapshot::empty(rel_path, hash);
                snapshot
                    .parse_errors
                    .push(ParseError::new(format!("Failed to read file: {}", e)));
                snapshot
            }
        }
    }

    pub fn save(store: &dyn BlobStore, snapshot: &AstSnapshot) -> Result<()> {
        write_json(store, &keys::ast(&snapshot.file_path), snapshot)
    }

    pub fn load(store: &dyn BlobStore, file_path: &str) -> Option<AstSnapshot> {
        read_json(store, &keys::ast(file_path))
    }

    pub fn delete(store: &dyn BlobStore, file_path: &str) -> Result<bool> {
        store.delete(&keys::ast(file_path))
    }
}

impl Default for AstExtractor {
    fn default() -> Self {
        Self::new(LanguageRegistry::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportMode {
    Named,
    Default,
}

struct Collector<'a> {
    parsed: &'a ParsedFile,
    snapshot: AstSnapshot,
    /// `export { local as exported }` without a source, resolved after the walk
    local_exports: Vec<(String, String, bool)>,
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn all_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn has_token(node: Node<'_>, token: &str) -> bool {
    all_children(node)
        .iter()
        .any(|c| !c.is_named() && c.kind() == token)
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

fn location(node: Node<'_>) -> SourceLocation {
    SourceLocation {
        start_offset: node.start_byte(),
        end_offset: node.end_byte(),
        line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
    }
}

impl<'a> Collector<'a> {
    fn new(parsed: &'a ParsedFile, file_path: &str, hash: &str) -> Self {
        Self {
            parsed,
            snapshot: AstSnapshot::empty(file_path, hash),
            local_exports: Vec::new(),
        }
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        self.parsed.node_text(&node)
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field).map(|n| self.text(n))
    }

    /// Leaf tokens joined by single spaces, comments dropped
    fn normalized_text(&self, node: Node<'_>) -> String {
        let mut tokens = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current.kind() == "comment" {
                continue;
            }
            if current.child_count() == 0 {
                let text = self.text(current).trim();
                if !text.is_empty() {
                    tokens.push(text);
                }
                continue;
            }
            let mut children = all_children(current);
            children.reverse();
            stack.extend(children);
        }
        tokens.join(" ")
    }

    fn run(mut self) -> AstSnapshot {
        let root = self.parsed.root_node();

        self.snapshot.parse_errors = self.parsed.syntax_errors(MAX_PARSE_ERRORS);

        let mut stack: Vec<(Node<'a>, Option<ExportMode>)> = Vec::new();
        let mut top = named_children(root);
        top.reverse();
        stack.extend(top.into_iter().map(|n| (n, None)));

        while let Some((node, export)) = stack.pop() {
            match node.kind() {
                "export_statement" => {
                    let mut inner = self.handle_export(node);
                    inner.reverse();
                    stack.extend(inner);
                }
                "ambient_declaration" => {
                    let mut children = named_children(node);
                    children.reverse();
                    stack.extend(children.into_iter().map(|n| (n, export)));
                }
                "expression_statement" => {
                    for child in named_children(node) {
                        match child.kind() {
                            "internal_module" | "module" => stack.push((child, export)),
                            "call_expression" => {
                                self.handle_require(child, None);
                            }
                            _ => {}
                        }
                    }
                }
                "internal_module" | "module" => {
                    if let Some(body) = node.child_by_field_name("body") {
                        let mut children = named_children(body);
                        children.reverse();
                        stack.extend(children.into_iter().map(|n| (n, None)));
                    }
                }
                "import_statement" => self.handle_import(node),
                "function_declaration" | "generator_function_declaration" | "function_signature" => {
                    let name = self.field_text(node, "name").unwrap_or("default").to_string();
                    let ast = self.function_node(node, node, &name);
                    self.push_node(ast, export);
                }
                "class_declaration" | "abstract_class_declaration" | "class" => {
                    let ast = self.class_node(node);
                    self.push_node(ast, export);
                }
                "interface_declaration" => {
                    let ast = self.type_node(node, NodeKind::Interface);
                    self.push_node(ast, export);
                }
                "type_alias_declaration" => {
                    let ast = self.type_node(node, NodeKind::Type);
                    self.push_node(ast, export);
                }
                "enum_declaration" => {
                    let ast = self.type_node(node, NodeKind::Enum);
                    self.push_node(ast, export);
                }
                "lexical_declaration" | "variable_declaration" => {
                    self.handle_variables(node, export);
                }
                _ => {}
            }
        }

        self.apply_local_exports();
        self.snapshot
    }

    fn push_node(&mut self, mut node: AstNode, export: Option<ExportMode>) {
        if let Some(mode) = export {
            let (export_name, kind) = match mode {
                ExportMode::Named => (node.name.clone(), ExportKind::from(node.kind)),
                ExportMode::Default => ("default".to_string(), ExportKind::Default),
            };
            node.add_export(export_name.clone());
            self.snapshot.exports.push(ExportInfo {
                name: export_name,
                kind,
                is_type_only: node.kind.is_type_like(),
            });
        }
        self.snapshot.nodes.push(node);
    }

    /// Returns declarations wrapped by the export to be walked next
    fn handle_export(&mut self, node: Node<'a>) -> Vec<(Node<'a>, Option<ExportMode>)> {
        let is_default = has_token(node, "default");
        let is_type_only = has_token(node, "type");
        let mode = if is_default {
            ExportMode::Default
        } else {
            ExportMode::Named
        };

        if let Some(decl) = node.child_by_field_name("declaration") {
            return vec![(decl, Some(mode))];
        }

        if is_default {
            if let Some(value) = node.child_by_field_name("value") {
                match value.kind() {
                    "identifier" => {
                        self.local_exports
                            .push((self.text(value).to_string(), "default".to_string(), false));
                    }
                    "function_expression" | "function" | "arrow_function"
                    | "generator_function" => {
                        let name = self.field_text(value, "name").unwrap_or("default").to_string();
                        let ast = self.function_node(value, value, &name);
                        self.push_node(ast, Some(ExportMode::Default));
                    }
                    "class" => return vec![(value, Some(ExportMode::Default))],
                    _ => self.snapshot.exports.push(ExportInfo {
                        name: "default".to_string(),
                        kind: ExportKind::Default,
                        is_type_only: false,
                    }),
                }
            }
            return Vec::new();
        }

        let source = node
            .child_by_field_name("source")
            .map(|s| strip_quotes(self.text(s)));

        let mut specifiers: Vec<(String, String)> = Vec::new();
        let mut star_alias: Option<Option<String>> = None;
        for child in all_children(node) {
            match child.kind() {
                "export_clause" => {
                    for spec in named_children(child) {
                        if spec.kind() != "export_specifier" {
                            continue;
                        }
                        let Some(name) = self.field_text(spec, "name") else {
                            continue;
                        };
                        let alias = self.field_text(spec, "alias").unwrap_or(name);
                        specifiers.push((name.to_string(), alias.to_string()));
                    }
                }
                "namespace_export" => {
                    let alias = named_children(child).first().map(|n| self.text(*n).to_string());
                    star_alias = Some(alias);
                }
                "*" => {
                    if star_alias.is_none() {
                        star_alias = Some(None);
                    }
                }
                _ => {}
            }
        }

        match source {
            Some(source) => {
                let mut names: Vec<String> = specifiers.iter().map(|(n, _)| n.clone()).collect();
                if star_alias.is_some() {
                    names.push("*".to_string());
                }
                let mut import = ImportInfo::new(source, names);
                import.is_type_only = is_type_only;
                self.snapshot.imports.push(import);

                for (_, alias) in specifiers {
                    self.snapshot.exports.push(ExportInfo {
                        name: alias,
                        kind: ExportKind::ReExport,
                        is_type_only,
                    });
                }
                if let Some(alias) = star_alias {
                    self.snapshot.exports.push(ExportInfo {
                        name: alias.unwrap_or_else(|| "*".to_string()),
                        kind: ExportKind::ReExport,
                        is_type_only,
                    });
                }
            }
            None => {
                for (name, alias) in specifiers {
                    self.local_exports.push((name, alias, is_type_only));
                }
            }
        }

        Vec::new()
    }

    fn apply_local_exports(&mut self) {
        for (local, exported, is_type_only) in std::mem::take(&mut self.local_exports) {
            let mut kind = ExportKind::ReExport;
            let mut type_like = is_type_only;
            for node in self.snapshot.nodes.iter_mut().filter(|n| n.name == local) {
                node.add_export(exported.clone());
                kind = if exported == "default" {
                    ExportKind::Default
                } else {
                    ExportKind::from(node.kind)
                };
                type_like |= node.kind.is_type_like();
            }
            self.snapshot.exports.push(ExportInfo {
                name: exported,
                kind,
                is_type_only: type_like,
            });
        }
    }

    fn handle_import(&mut self, node: Node<'_>) {
        let source = node.child_by_field_name("source").or_else(|| {
            named_children(node)
                .into_iter()
                .find(|c| c.kind() == "import_require_clause")
                .and_then(|c| c.child_by_field_name("source"))
        });
        let Some(source) = source else {
            return;
        };

        let mut names = Vec::new();
        for child in named_children(node) {
            if child.kind() != "import_clause" {
                continue;
            }
            for part in named_children(child) {
                match part.kind() {
                    "identifier" => names.push(self.text(part).to_string()),
                    "namespace_import" => names.push("*".to_string()),
                    "named_imports" => {
                        for spec in named_children(part) {
                            if spec.kind() == "import_specifier" {
                                if let Some(name) = self.field_text(spec, "name") {
                                    names.push(name.to_string());
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut import = ImportInfo::new(strip_quotes(self.text(source)), names);
        import.is_type_only = has_token(node, "type");
        self.snapshot.imports.push(import);
    }

    /// Records `require("x")` as an import
    fn handle_require(&mut self, call: Node<'_>, binding: Option<&str>) -> bool {
        let Some(function) = call.child_by_field_name("function") else {
            return false;
        };
        if function.kind() != "identifier" || self.text(function) != "require" {
            return false;
        }
        let Some(arguments) = call.child_by_field_name("arguments") else {
            return false;
        };
        let Some(first) = named_children(arguments).into_iter().next() else {
            return false;
        };
        if first.kind() != "string" {
            return false;
        }

        let names = binding.map(|b| vec![b.to_string()]).unwrap_or_default();
        self.snapshot
            .imports
            .push(ImportInfo::new(strip_quotes(self.text(first)), names));
        true
    }

    fn handle_variables(&mut self, node: Node<'_>, export: Option<ExportMode>) {
        let keyword = all_children(node)
            .first()
            .map(|c| self.text(*c))
            .filter(|k| matches!(*k, "const" | "let" | "var"))
            .unwrap_or("const");

        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            if name_node.kind() != "identifier" {
                continue;
            }
            let name = self.text(name_node);

            let value = declarator.child_by_field_name("value");
            if let Some(value) = value.filter(|v| {
                matches!(
                    v.kind(),
                    "arrow_function" | "function_expression" | "function" | "generator_function"
                )
            }) {
                let mut ast = self.function_node(value, declarator, name);
                ast.location = location(declarator);
                self.push_node(ast, export);
                continue;
            }
            if let Some(call) = value.filter(|v| v.kind() == "call_expression") {
                if self.handle_require(call, Some(name)) {
                    continue;
                }
            }

            if export.is_some() {
                let type_annotation = self
                    .field_text(declarator, "type")
                    .map(|t| t.trim_start_matches(':').trim().to_string());
                let signature = match &type_annotation {
                    Some(t) => format!("{} {}: {}", keyword, name, t),
                    None => format!("{} {}", keyword, name),
                };
                let mut ast = AstNode::new(NodeKind::Variable, name).with_signature(signature);
                if let Some(t) = type_annotation {
                    ast = ast.with_return_type(t);
                }
                ast.location = location(declarator);
                self.push_node(ast, export);
            }
        }
    }

    /// `func` carries parameters/return type/body; `decl` is the declaration
    fn function_node(&self, func: Node<'_>, decl: Node<'_>, name: &str) -> AstNode {
        let parameters = self.parameters(func);
        let return_type = self
            .field_text(func, "return_type")
            .map(|t| t.trim_start_matches(':').trim().to_string());
        let type_params = self.field_text(func, "type_parameters").unwrap_or("");
        let is_async = has_token(func, "async");

        let rendered: Vec<String> = parameters.iter().map(|p| p.render()).collect();
        let mut signature = format!(
            "{}function {}{}({})",
            if is_async { "async " } else { "" },
            name,
            type_params,
            rendered.join(", ")
        );
        if let Some(ret) = &return_type {
            signature.push_str(": ");
            signature.push_str(ret);
        }

        let mut node = AstNode::new(NodeKind::Function, name)
            .with_signature(signature)
            .with_parameters(parameters);
        if let Some(ret) = return_type {
            node = node.with_return_type(ret);
        }
        node.location = location(decl);
        if let Some(body) = func.child_by_field_name("body") {
            node.calls = self.collect_calls(body);
        }
        node
    }

    fn parameters(&self, func: Node<'_>) -> Vec<Parameter> {
        if let Some(single) = func.child_by_field_name("parameter") {
            return vec![Parameter::new(self.text(single), None)];
        }
        let Some(params) = func.child_by_field_name("parameters") else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for param in named_children(params) {
            match param.kind() {
                "required_parameter" | "optional_parameter" => {
                    let name = param
                        .child_by_field_name("pattern")
                        .map(|p| self.normalized_text(p))
                        .unwrap_or_default();
                    let type_annotation = self
                        .field_text(param, "type")
                        .map(|t| t.trim_start_matches(':').trim().to_string());
                    let default_value = self.field_text(param, "value").map(|v| v.to_string());
                    out.push(Parameter {
                        name,
                        type_annotation,
                        optional: param.kind() == "optional_parameter" || default_value.is_some(),
                        default_value,
                    });
                }
                "identifier" => out.push(Parameter::new(self.text(param), None)),
                "assignment_pattern" => {
                    let name = self.field_text(param, "left").unwrap_or_default();
                    let mut p = Parameter::new(name, None).optional();
                    p.default_value = self.field_text(param, "right").map(|v| v.to_string());
                    out.push(p);
                }
                "rest_pattern" | "object_pattern" | "array_pattern" => {
                    out.push(Parameter::new(self.normalized_text(param), None));
                }
                _ => {}
            }
        }
        out
    }

    fn class_node(&self, node: Node<'_>) -> AstNode {
        let name = self.field_text(node, "name").unwrap_or("default");
        let type_params = self.field_text(node, "type_parameters").unwrap_or("");

        let mut signature = format!("class {}{}", name, type_params);
        for child in named_children(node) {
            if child.kind() == "class_heritage" {
                signature.push(' ');
                signature.push_str(&self.normalized_text(child));
            }
        }

        let mut members = Vec::new();
        let mut calls = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for member in named_children(body) {
                if let Some(rendered) = self.render_member(member) {
                    members.push(rendered);
                }
            }
            calls = self.collect_calls(body);
        }
        if !members.is_empty() {
            signature.push_str(&format!(" {{ {} }}", members.join("; ")));
        }

        let mut ast = AstNode::new(NodeKind::Class, name).with_signature(signature);
        ast.location = location(node);
        ast.calls = calls;
        ast
    }

    /// Public surface of a class member, `None` for private members
    fn render_member(&self, member: Node<'_>) -> Option<String> {
        let kind = member.kind();
        if !matches!(
            kind,
            "method_definition" | "method_signature" | "abstract_method_signature" | "public_field_definition"
        ) {
            return None;
        }

        let children = all_children(member);
        let is_private = children.iter().any(|c| {
            c.kind() == "accessibility_modifier" && matches!(self.text(*c), "private" | "protected")
        });
        let name = self.field_text(member, "name")?;
        if is_private || name.starts_with('#') {
            return None;
        }
        let is_static = children.iter().any(|c| c.kind() == "static");
        let prefix = if is_static { "static " } else { "" };

        if kind == "public_field_definition" {
            let ty = self
                .field_text(member, "type")
                .map(|t| format!(": {}", t.trim_start_matches(':').trim()))
                .unwrap_or_default();
            let optional = if has_token(member, "?") { "?" } else { "" };
            return Some(format!("{}{}{}{}", prefix, name, optional, ty));
        }

        let params: Vec<String> = self.parameters(member).iter().map(|p| p.render()).collect();
        let ret = self
            .field_text(member, "return_type")
            .map(|t| format!(": {}", t.trim_start_matches(':').trim()))
            .unwrap_or_default();
        Some(format!("{}{}({}){}", prefix, name, params.join(", "), ret))
    }

    fn type_node(&self, node: Node<'_>, kind: NodeKind) -> AstNode {
        let name = self.field_text(node, "name").unwrap_or("default");
        let mut ast = AstNode::new(kind, name).with_signature(self.normalized_text(node));
        ast.location = location(node);
        ast
    }

    fn collect_calls(&self, body: Node<'_>) -> Vec<String> {
        let mut calls: Vec<String> = Vec::new();
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            let callee = match node.kind() {
                "call_expression" => node.child_by_field_name("function").and_then(|f| match f.kind() {
                    "identifier" => Some(self.text(f)),
                    "member_expression" => self.field_text(f, "property"),
                    _ => None,
                }),
                "new_expression" => node
                    .child_by_field_name("constructor")
                    .filter(|c| c.kind() == "identifier")
                    .map(|c| self.text(c)),
                _ => None,
            };
            if let Some(name) = callee {
                if name != "require" && !calls.iter().any(|c| c == name) {
                    calls.push(name.to_string());
                }
            }
            let mut children = named_children(node);
            children.reverse();
            stack.extend(children);
        }
        calls
    }
}
