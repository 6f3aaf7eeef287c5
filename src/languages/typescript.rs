use super::LanguageGrammar;

fn tag_for(extension: &str) -> &'static str {
    match extension {
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        _ => "typescript",
    }
}

pub struct TypeScriptGrammar;

impl LanguageGrammar for TypeScriptGrammar {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["ts", "mts", "cts", "js", "mjs", "cjs"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
    }

    fn language_tag(&self, extension: &str) -> &'static str {
        tag_for(extension)
    }
}

/// JSX-aware variant of the TypeScript grammar
pub struct TsxGrammar;

impl LanguageGrammar for TsxGrammar {
    fn name(&self) -> &'static str {
        "tsx"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["tsx", "jsx"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TSX.into()
    }

    fn language_tag(&self, extension: &str) -> &'static str {
        tag_for(extension)
    }
}
