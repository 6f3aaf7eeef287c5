//! Node-level AST diffing and breaking-change classification.

pub mod ast_diff;
pub mod breaking;

pub use ast_diff::{
    scores, AstDiff, AstDiffEngine, ChangePattern, ChangePatternKind, ControlFlowChange, ModifiedNode,
    NodeChange,
};
pub use breaking::{BreakingChangeDetector, INTERNAL_ADJUSTMENT};
