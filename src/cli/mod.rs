mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::run;

#[derive(Parser)]
#[command(name = "code-impact")]
#[command(about = "Change impact and breaking-change analysis for TypeScript/JavaScript projects")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Take a baseline snapshot
    code-impact snapshot

    # Analyze edited files against the latest snapshot
    code-impact analyze src/util.ts src/app.ts

    # What depends on a file
    code-impact impact src/util.ts

    # Breaking changes in the working tree
    code-impact breaking

    # Keep analyzing as files change
    code-impact watch
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Configuration file (defaults to <root>/.code-impact.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Engine and storage status
    Health,

    /// Rebuild the file index
    Scan,

    /// Create a full snapshot
    Snapshot,

    /// Incrementally analyze changed files
    Analyze {
        /// Changed files, absolute or relative to the root
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Impact of changing a file
    Impact {
        file: String,

        /// Depth-first traversal instead of breadth-first
        #[arg(long)]
        dfs: bool,
    },

    /// Current dependency graph
    Graph {
        /// Only the detected cycles
        #[arg(long)]
        cycles: bool,

        /// Only the strongly connected components
        #[arg(long)]
        sccs: bool,

        /// Only clusters of mutually dependent files
        #[arg(long)]
        clusters: bool,
    },

    /// Breaking changes between the latest snapshot and the working tree
    Breaking {
        /// Attach offline advisory notes
        #[arg(long)]
        advise: bool,
    },

    /// Compare two stored snapshots
    Compare { from: String, to: String },

    /// Snapshot history, newest first
    History {
        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only snapshots carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Print one snapshot
    Show { id: String },

    /// Metric trends and regressions across history
    Trend,

    /// Tag a snapshot
    Tag {
        id: String,

        #[arg(required = true)]
        tags: Vec<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Export a snapshot to a portable file (.gz compresses)
    Export { id: String, dest: PathBuf },

    /// Import an exported snapshot
    Import { src: PathBuf },

    /// Apply retention and compression
    Maintain,

    /// Preview returning the working tree to a snapshot (never writes)
    Restore { id: String },

    /// Stored advisory notes
    Advisories {
        #[arg(long)]
        file: Option<String>,
    },

    /// Declarations calling a symbol
    Callers { symbol: String },

    /// Declarations a symbol calls
    Callees { symbol: String },

    /// All paths between two symbols in the property graph
    Paths {
        from: String,
        to: String,

        #[arg(long, default_value = "6")]
        max_depth: usize,
    },

    /// Files git reports as changed
    Changed {
        /// Compare against this revision instead of the index
        #[arg(long)]
        base: Option<String>,

        /// Run incremental analysis on the changed files
        #[arg(long)]
        analyze: bool,
    },

    /// Git diff text for one file
    Diff {
        file: String,

        #[arg(long)]
        base: Option<String>,
    },

    /// Watch the tree and analyze each batch of changes
    Watch {
        /// Debounce window in milliseconds
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
}
