pub mod cpg;
pub mod dependency;
pub mod impact;
pub mod scc;

pub use cpg::{CodePropertyGraph, CpgEdge, CpgEdgeKind, CpgNode, CpgNodeKind};
pub use dependency::{
    calculate_dependency_strength, detect_cycles, find_strongly_connected_components, resolve_import,
    DependencyMapper,
};
pub use impact::{FileImpact, ImpactAnalyzer, ImpactOptions, ImpactResult, ImpactTier};
