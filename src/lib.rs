pub mod advisory;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod events;
pub mod git;
pub mod graph;
pub mod index;
pub mod indexer;
pub mod languages;
pub mod snapshot;

use once_cell::sync::Lazy;

pub use advisory::{Advisory, AdvisoryProvider, AdvisoryReport, AdvisoryRisk, AdvisoryStore, RuleBasedProvider};
pub use config::{EngineConfig, HashAlgorithm, ImpactWeights, RetentionConfig};
pub use diff::{AstDiff, AstDiffEngine, BreakingChangeDetector, ChangePattern, ChangePatternKind, ControlFlowChange};
pub use engine::{AnalysisResult, Engine, FileDetails, Health, RestorePreview};
pub use error::{ImpactError, Result};
pub use events::{EventBus, EventSubscriber, FileChange, ImpactEvent, Subscription};
pub use git::{ChangeStatus, ChangedFile, GitIntegration};
pub use graph::{
    calculate_dependency_strength, detect_cycles, find_strongly_connected_components, CodePropertyGraph,
    DependencyMapper, FileImpact, ImpactAnalyzer, ImpactOptions, ImpactResult,
};
pub use index::{
    AstNode, AstSnapshot, BlobStore, ChangeDetail, ChangeDetailKind, ChangeReport, DependencyGraph,
    DependencyNode, FileChangeType, FileMetadata, FsStore, MemoryStore, NodeKind, RiskLevel, Snapshot,
    SnapshotMetadata,
};
pub use indexer::{AstExtractor, FileWalker, FileWatcher, HashManager, Indexer};
pub use languages::LanguageRegistry;
pub use snapshot::{
    ChangeTracker, Page, SnapshotDelta, SnapshotDiffEngine, SnapshotManager, SnapshotSummary, TrackOutcome,
    TrendAnalyzer, TrendReport,
};

/// Global language registry instance (lazily initialized)
pub static REGISTRY: Lazy<LanguageRegistry> = Lazy::new(LanguageRegistry::new);
