pub mod extractor;
pub mod file_index;
pub mod hash;
pub mod parser;
pub mod walker;
pub mod watcher;

pub use extractor::AstExtractor;
pub use file_index::{IncrementalOutcome, Indexer};
pub use hash::{content_hash, HashManager};
pub use parser::{ParsedFile, SourceParser};
pub use walker::{relative_path, FileWalker, IgnoreRules, DEFAULT_IGNORE_DIRS};
pub use watcher::{FileEvent, FileWatcher, DEFAULT_DEBOUNCE_MS};
