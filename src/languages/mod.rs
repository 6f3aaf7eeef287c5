pub mod typescript;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub trait LanguageGrammar: Send + Sync {
    fn name(&self) -> &'static str;
    fn file_extensions(&self) -> &[&'static str];
    fn language(&self) -> tree_sitter::Language;

    /// Human-facing language tag recorded in file metadata
    fn language_tag(&self, extension: &str) -> &'static str {
        let _ = extension;
        self.name()
    }
}

#[derive(Clone)]
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<dyn LanguageGrammar>>,
    extension_map: HashMap<String, String>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
        };

        registry.register(Arc::new(typescript::TypeScriptGrammar));
        registry.register(Arc::new(typescript::TsxGrammar));

        registry
    }

    pub fn register(&mut self, grammar: Arc<dyn LanguageGrammar>) {
        let name = grammar.name().to_string();
        for ext in grammar.file_extensions() {
            self.extension_map.insert(ext.to_string(), name.clone());
        }
        self.languages.insert(name, grammar);
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn LanguageGrammar>> {
        self.languages.get(name).cloned()
    }

    pub fn get_by_extension(&self, ext: &str) -> Option<Arc<dyn LanguageGrammar>> {
        self.extension_map
            .get(ext)
            .and_then(|name| self.languages.get(name))
            .cloned()
    }

    pub fn get_for_file(&self, path: &Path) -> Option<Arc<dyn LanguageGrammar>> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.get_by_extension(ext))
    }

    /// Language tag for a tracked file, `None` when the extension is not tracked
    pub fn language_tag(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?;
        self.get_by_extension(ext).map(|g| g.language_tag(ext))
    }

    pub fn supported_extensions(&self) -> Vec<&str> {
        self.extension_map.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new() {
        let registry = LanguageRegistry::new();
        assert!(registry.get_by_name("typescript").is_some());
        assert!(registry.get_by_name("tsx").is_some());
    }

    #[test]
    fn test_get_by_name_unknown() {
        let registry = LanguageRegistry::new();
        assert!(registry.get_by_name("rust").is_none());
        assert!(registry.get_by_name("").is_none());
    }

    #[test]
    fn test_get_by_extension_typescript() {
        let registry = LanguageRegistry::new();

        assert_eq!(registry.get_by_extension("ts").unwrap().name(), "typescript");
        assert_eq!(registry.get_by_extension("mts").unwrap().name(), "typescript");
        assert_eq!(registry.get_by_extension("js").unwrap().name(), "typescript");
        assert_eq!(registry.get_by_extension("tsx").unwrap().name(), "tsx");
        assert_eq!(registry.get_by_extension("jsx").unwrap().name(), "tsx");
    }

    #[test]
    fn test_get_by_extension_unknown() {
        let registry = LanguageRegistry::new();
        assert!(registry.get_by_extension("rs").is_none());
        assert!(registry.get_by_extension("json").is_none());
        assert!(registry.get_by_extension("").is_none());
    }

    #[test]
    fn test_get_for_file() {
        let registry = LanguageRegistry::new();
        assert!(registry.get_for_file(Path::new("src/app.ts")).is_some());
        assert!(registry.get_for_file(Path::new("README.md")).is_none());
        assert!(registry.get_for_file(Path::new("Makefile")).is_none());
    }

    #[test]
    fn test_language_tag() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.language_tag(Path::new("a.ts")), Some("typescript"));
        assert_eq!(registry.language_tag(Path::new("a.tsx")), Some("typescript"));
        assert_eq!(registry.language_tag(Path::new("a.js")), Some("javascript"));
        assert_eq!(registry.language_tag(Path::new("a.jsx")), Some("javascript"));
        assert_eq!(registry.language_tag(Path::new("a.txt")), None);
    }

    #[test]
    fn test_supported_extensions() {
        let registry = LanguageRegistry::new();
        let exts = registry.supported_extensions();
        assert_eq!(exts.len(), 8);
        assert!(exts.contains(&"cjs"));
    }
}
