use std::path::Path;

use tree_sitter::Node;

use crate::error::{ImpactError, Result};
use crate::index::ParseError;
use crate::languages::LanguageRegistry;

/// Picks a grammar by file extension and produces a syntax tree
pub struct SourceParser {
    registry: LanguageRegistry,
}

impl SourceParser {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self { registry }
    }

    pub fn supports(&self, file_path: &str) -> bool {
        self.registry.get_for_file(Path::new(file_path)).is_some()
    }

    /// Parses `source` with the grammar registered for `file_path`'s
    /// extension. Syntax errors do not fail the parse.
    pub fn parse(&self, file_path: &str, source: &str) -> Result<ParsedFile> {
        let grammar = self
            .registry
            .get_for_file(Path::new(file_path))
            .ok_or_else(|| ImpactError::UnsupportedLanguage(file_path.to_string()))?;

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar.language())
            .map_err(|e| ImpactError::Parse(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ImpactError::Parse(format!("Parser gave up on {}", file_path)))?;

        Ok(ParsedFile {
            tree,
            source: source.to_string(),
        })
    }
}

pub struct ParsedFile {
    tree: tree_sitter::Tree,
    source: String,
}

impl ParsedFile {
    pub fn root_node(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn node_text(&self, node: &Node) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// Error and missing nodes in document order, at most `limit`.
    /// Subtrees without errors are skipped.
    pub fn syntax_errors(&self, limit: usize) -> Vec<ParseError> {
        let mut errors = Vec::new();
        let root = self.root_node();
        if !root.has_error() {
            return errors;
        }

        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if errors.len() >= limit {
                break;
            }
            if node.is_error() || node.is_missing() {
                let position = node.start_position();
                let message = if node.is_missing() {
                    format!("Missing {}", node.kind())
                } else {
                    "Syntax error".to_string()
                };
                errors.push(ParseError {
                    message,
                    line: position.row + 1,
                    column: position.column,
                });
                continue;
            }
            if node.has_error() {
                let mut cursor = node.walk();
                let mut children: Vec<Node> = node.children(&mut cursor).collect();
                children.reverse();
                stack.extend(children);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> SourceParser {
        SourceParser::new(LanguageRegistry::new())
    }

    #[test]
    fn test_parse_typescript_and_tsx() {
        let p = parser();
        let ts = p.parse("greet.ts", "function greet(name: string) { return `hi ${name}`; }").unwrap();
        assert_eq!(ts.root_node().kind(), "program");
        assert!(ts.syntax_errors(10).is_empty());

        let tsx = p.parse("App.tsx", "export const App = () => <div>hi</div>;").unwrap();
        assert!(!tsx.root_node().has_error());
    }

    #[test]
    fn test_unsupported_extension() {
        let p = parser();
        assert!(!p.supports("notes.txt"));
        assert!(matches!(p.parse("notes.txt", ""), Err(ImpactError::UnsupportedLanguage(_))));
    }

    #[test]
    fn test_node_text_covers_source() {
        let parsed = parser().parse("a.ts", "function hello() {}").unwrap();
        let root = parsed.root_node();
        assert_eq!(parsed.node_text(&root), parsed.source());
    }

    #[test]
    fn test_syntax_errors_located_and_capped() {
        let parsed = parser().parse("bad.ts", "const x = ;\nfunction (\n").unwrap();
        let errors = parsed.syntax_errors(10);
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|e| e.line >= 1));
        assert_eq!(parsed.syntax_errors(1).len(), 1);
    }
}
